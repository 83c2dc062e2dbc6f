//! Feature builder for the win/place models.
//!
//! Training and prediction both go through [`FeatureBuilder::derive`], so the
//! feature order below is the model input contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{ParticipantRow, RaceRow};

/// Feature names in model input order
pub const FEATURE_NAMES: [&str; 6] = [
    "age",
    "sex_code",
    "distance",
    "discipline_code",
    "track_bias_code",
    "form_length",
];

/// Number of input features
pub const NUM_FEATURES: usize = 6;

/// Six features for one participant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub age: f64,
    pub sex_code: f64,           // MALES:1, HONGRES:2, FEMELLES:3
    pub distance: f64,
    pub discipline_code: f64,    // ATTELE:1, MONTE:2
    pub track_bias_code: f64,    // CORDE_GAUCHE:1, CORDE_DROITE:2
    pub form_length: f64,
}

impl FeatureVector {
    /// Convert to array in model input order
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.age,
            self.sex_code,
            self.distance,
            self.discipline_code,
            self.track_bias_code,
            self.form_length,
        ]
    }
}

/// Training targets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Labels {
    pub won: f64,
    pub placed: f64,
}

/// Why a record cannot be used
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Excluded {
    #[error("missing feature: {0}")]
    MissingFeature(&'static str),

    #[error("missing finishing order")]
    MissingLabel,
}

/// Labels from a finishing order; `None` when the race has no result yet
pub fn derive_labels(finishing_order: Option<u32>) -> Option<Labels> {
    finishing_order.map(|order| Labels {
        won: if order == 1 { 1.0 } else { 0.0 },
        placed: if (1..=3).contains(&order) { 1.0 } else { 0.0 },
    })
}

/// Feature builder
pub struct FeatureBuilder;

impl FeatureBuilder {
    /// Build the feature vector for a participant of a race
    pub fn derive(participant: &ParticipantRow, race: &RaceRow) -> Result<FeatureVector, Excluded> {
        let age = participant
            .age
            .map(f64::from)
            .ok_or(Excluded::MissingFeature("age"))?;
        let sex_code = participant
            .sex
            .as_deref()
            .and_then(Self::encode_sex)
            .ok_or(Excluded::MissingFeature("sex_code"))?;
        let distance = race
            .distance
            .map(f64::from)
            .ok_or(Excluded::MissingFeature("distance"))?;
        let discipline_code = race
            .discipline
            .as_deref()
            .and_then(Self::encode_discipline)
            .ok_or(Excluded::MissingFeature("discipline_code"))?;
        let track_bias_code = race
            .track_bias
            .as_deref()
            .and_then(Self::encode_track_bias)
            .ok_or(Excluded::MissingFeature("track_bias_code"))?;

        Ok(FeatureVector {
            age,
            sex_code,
            distance,
            discipline_code,
            track_bias_code,
            form_length: Self::form_length(participant.form.as_deref()),
        })
    }

    /// Build features and labels for a finished participant
    pub fn derive_training(
        participant: &ParticipantRow,
        race: &RaceRow,
    ) -> Result<(FeatureVector, Labels), Excluded> {
        let features = Self::derive(participant, race)?;
        let labels = derive_labels(participant.finishing_order).ok_or(Excluded::MissingLabel)?;
        Ok((features, labels))
    }

    /// Encode sex to numeric value
    pub fn encode_sex(sex: &str) -> Option<f64> {
        match sex {
            "MALES" => Some(1.0),
            "HONGRES" => Some(2.0),
            "FEMELLES" => Some(3.0),
            _ => None,
        }
    }

    /// Encode discipline to numeric value
    pub fn encode_discipline(discipline: &str) -> Option<f64> {
        match discipline {
            "ATTELE" => Some(1.0),
            "MONTE" => Some(2.0),
            _ => None,
        }
    }

    /// Encode rail side to numeric value
    pub fn encode_track_bias(corde: &str) -> Option<f64> {
        match corde {
            "CORDE_GAUCHE" => Some(1.0),
            "CORDE_DROITE" => Some(2.0),
            _ => None,
        }
    }

    /// Number of whitespace-separated entries in the form string (musique)
    pub fn form_length(form: Option<&str>) -> f64 {
        form.map(|f| f.split_whitespace().count() as f64)
            .unwrap_or(0.0)
    }
}
