//! Upstream JSON payloads from the PMU programme API.
//!
//! These structs are the allow-list of accepted upstream fields: anything the
//! API sends that is not named here is dropped at decode time.

use serde::{Deserialize, Serialize};

/// Country as embedded in a meeting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountryPayload {
    pub code: String,
    #[serde(default, rename = "libelle")]
    pub name: Option<String>,
}

/// Venue (hippodrome) as embedded in a meeting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenuePayload {
    pub code: String,
    #[serde(default, rename = "libelleCourt")]
    pub short_name: Option<String>,
    #[serde(default, rename = "libelleLong")]
    pub long_name: Option<String>,
}

/// Venue reference carried by a race
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceVenueRef {
    #[serde(default, rename = "codeHippodrome")]
    pub code: Option<String>,
}

/// Meeting (réunion) programme response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingPayload {
    #[serde(rename = "numOfficiel")]
    pub official_number: u32,
    #[serde(default, rename = "numExterne")]
    pub external_number: Option<u32>,
    #[serde(default)]
    pub nature: Option<String>,
    #[serde(rename = "hippodrome")]
    pub venue: VenuePayload,
    #[serde(rename = "pays")]
    pub country: CountryPayload,
    #[serde(default, rename = "courses")]
    pub races: Vec<RacePayload>,
}

/// Race (course) inside a meeting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RacePayload {
    #[serde(rename = "numReunion")]
    pub meeting_number: u32,
    #[serde(rename = "numOrdre")]
    pub order_number: u32,
    #[serde(rename = "heureDepart")]
    pub start_time_ms: i64,
    #[serde(default, rename = "libelle")]
    pub name: Option<String>,
    #[serde(default)]
    pub distance: Option<u32>,
    #[serde(default)]
    pub discipline: Option<String>,
    #[serde(default, rename = "specialite")]
    pub specialty: Option<String>,
    #[serde(default, rename = "corde")]
    pub track_bias: Option<String>,
    #[serde(default, rename = "montantPrix")]
    pub prize_money: Option<i64>,
    #[serde(default, rename = "nombreDeclaresPartants")]
    pub declared_runners: Option<u32>,
    #[serde(default, rename = "hippodrome")]
    pub venue: Option<RaceVenueRef>,
}

/// Latest direct odds report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OddsReport {
    #[serde(default, rename = "rapport")]
    pub report: Option<f64>,
}

/// Post-race commentary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceComment {
    #[serde(default, rename = "texte")]
    pub text: Option<String>,
}

/// Participant (partant) in a race
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantPayload {
    #[serde(rename = "numPmu")]
    pub program_number: u32,
    #[serde(default, rename = "nom")]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default, rename = "sexe")]
    pub sex: Option<String>,
    #[serde(default, rename = "musique")]
    pub form: Option<String>,
    #[serde(default, rename = "ordreArrivee")]
    pub finishing_order: Option<u32>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default, rename = "entraineur")]
    pub trainer: Option<String>,
    #[serde(default, rename = "dernierRapportDirect")]
    pub last_direct_report: Option<OddsReport>,
    #[serde(default, rename = "commentaireApresCourse")]
    pub post_race_comment: Option<RaceComment>,
}

impl ParticipantPayload {
    /// Current odds, when the upstream reported them
    pub fn odds(&self) -> Option<f64> {
        self.last_direct_report.as_ref().and_then(|r| r.report)
    }

    /// Post-race commentary text, when present
    pub fn commentary(&self) -> Option<&str> {
        self.post_race_comment
            .as_ref()
            .and_then(|c| c.text.as_deref())
    }
}

/// Participants list response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParticipantsPayload {
    #[serde(default)]
    pub participants: Vec<ParticipantPayload>,
}
