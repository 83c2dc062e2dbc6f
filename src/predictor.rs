//! Prediction driver: ranks the participants of one stored race.

use anyhow::Context;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{FeatureBuilder, NUM_FEATURES};
use crate::model::{ModelStore, RandomForest, PLACE_MODEL, WIN_MODEL};
use crate::scraper::RaceIdentifier;
use crate::storage::Database;

/// Participants reported by win probability
pub const TOP_WIN: usize = 3;

/// Participants reported by place probability
pub const TOP_PLACE: usize = 5;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Race {0} not found")]
    RaceNotFound(i64),

    #[error("No participants with usable features found for race {0}")]
    NoParticipants(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Win and place classifiers, loaded once per process
#[derive(Debug, Clone)]
pub struct PredictionModels {
    pub win: RandomForest,
    pub place: RandomForest,
}

impl PredictionModels {
    pub fn load(store: &ModelStore) -> anyhow::Result<Self> {
        let win = store.load(WIN_MODEL)?;
        let place = store.load(PLACE_MODEL)?;
        info!(
            "Loaded models ({} and {} trees)",
            win.n_trees(),
            place.n_trees()
        );
        Ok(Self { win, place })
    }
}

/// Probabilities for one participant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantPrediction {
    pub program_number: u32,
    pub name: Option<String>,
    pub win_probability: f64,
    pub place_probability: f64,
}

/// Ranked predictions for a race
#[derive(Debug, Clone, Serialize)]
pub struct RacePrediction {
    pub race_id: i64,
    /// `<ddmmyyyy>R<meeting>C<race>`
    pub race: String,
    pub name: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Participants left out for missing features
    pub skipped: usize,
    pub top_win: Vec<ParticipantPrediction>,
    pub top_place: Vec<ParticipantPrediction>,
}

fn top_by<F>(entries: &[ParticipantPrediction], n: usize, key: F) -> Vec<ParticipantPrediction>
where
    F: Fn(&ParticipantPrediction) -> f64,
{
    let mut ranked = entries.to_vec();
    // Stable sort: equal probabilities stay in program-number order
    ranked.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
    ranked.truncate(n);
    ranked
}

/// Predict win and place probabilities for every participant of a race
pub fn predict_race(
    db: &Database,
    models: &PredictionModels,
    race_id: i64,
) -> Result<RacePrediction, PredictError> {
    let race = db
        .get_race(race_id)
        .context("Failed to load race")?
        .ok_or(PredictError::RaceNotFound(race_id))?;
    let participants = db
        .get_participants(race_id)
        .context("Failed to load participants")?;

    let mut usable = Vec::with_capacity(participants.len());
    let mut rows: Vec<f64> = Vec::with_capacity(participants.len() * NUM_FEATURES);
    for participant in &participants {
        match FeatureBuilder::derive(participant, &race) {
            Ok(features) => {
                rows.extend_from_slice(&features.to_array());
                usable.push(participant);
            }
            Err(reason) => warn!(
                "Skipping participant {} of race {}: {}",
                participant.program_number, race_id, reason
            ),
        }
    }

    if usable.is_empty() {
        return Err(PredictError::NoParticipants(race_id));
    }

    let features = Array2::from_shape_vec((usable.len(), NUM_FEATURES), rows)
        .context("Failed to build feature matrix")?;
    let win = models.win.predict_proba(features.view());
    let place = models.place.predict_proba(features.view());

    let entries: Vec<ParticipantPrediction> = usable
        .iter()
        .enumerate()
        .map(|(i, p)| ParticipantPrediction {
            program_number: p.program_number,
            name: p.name.clone(),
            win_probability: win[i],
            place_probability: place[i],
        })
        .collect();

    let identifier = RaceIdentifier {
        date: race.meeting_date,
        meeting: race.meeting_number,
        race: race.order_number,
    };

    Ok(RacePrediction {
        race_id,
        race: identifier.to_string(),
        name: race.name,
        start_time: race.start_time,
        skipped: participants.len() - usable.len(),
        top_win: top_by(&entries, TOP_WIN, |e| e.win_probability),
        top_place: top_by(&entries, TOP_PLACE, |e| e.place_probability),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_NAMES;
    use crate::model::ForestConfig;
    use crate::storage::repository::{NewParticipant, NewRace};
    use chrono::{NaiveDate, TimeZone};
    use ndarray::Array1;
    use tempfile::TempDir;

    /// Forest where younger horses score higher
    fn age_forest(threshold: f64) -> RandomForest {
        let x = Array2::from_shape_fn((60, NUM_FEATURES), |(i, j)| match j {
            0 => (3 + i % 6) as f64,
            1 => 1.0,
            2 => 2700.0,
            3 => 1.0,
            4 => 1.0,
            _ => 2.0,
        });
        let y = Array1::from_shape_fn(60, |i| if ((3 + i % 6) as f64) < threshold { 1.0 } else { 0.0 });
        let mut forest = RandomForest::new(ForestConfig {
            n_trees: 5,
            bootstrap: false,
            ..Default::default()
        });
        forest.fit(x.view(), y.view(), &FEATURE_NAMES).unwrap();
        forest
    }

    fn models() -> PredictionModels {
        PredictionModels {
            win: age_forest(4.0),
            place: age_forest(6.0),
        }
    }

    fn new_race() -> NewRace {
        NewRace {
            meeting_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            meeting_number: 1,
            order_number: 3,
            name: Some("PRIX D'AMERIQUE".to_string()),
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 15, 15, 0).unwrap(),
            distance: Some(2700),
            discipline: Some("ATTELE".to_string()),
            specialty: None,
            track_bias: Some("CORDE_GAUCHE".to_string()),
            prize_money: None,
            declared_runners: None,
            venue_code: None,
        }
    }

    fn new_participant(race_id: i64, number: u32, age: u32) -> NewParticipant {
        NewParticipant {
            race_id,
            program_number: number,
            name: Some(format!("Horse {}", number)),
            age: Some(age),
            sex: Some("MALES".to_string()),
            form: Some("1a 2a".to_string()),
            odds: None,
            commentary: None,
            finishing_order: None,
            driver: None,
            trainer: None,
        }
    }

    fn seed_race(db: &mut Database, participants: &[NewParticipant]) -> i64 {
        let uow = db.begin().unwrap();
        let race_id = uow.insert_race(&new_race()).unwrap();
        for p in participants {
            uow.insert_participant(&NewParticipant {
                race_id,
                ..p.clone()
            })
            .unwrap();
        }
        uow.commit().unwrap();
        race_id
    }

    #[test]
    fn test_ranks_win_and_place() {
        let mut db = Database::in_memory().unwrap();
        let participants: Vec<_> = (1..=8)
            .map(|n| new_participant(0, n, 10 - n))
            .collect();
        let race_id = seed_race(&mut db, &participants);

        let prediction = predict_race(&db, &models(), race_id).unwrap();
        assert_eq!(prediction.race, "01012024R1C3");
        assert_eq!(prediction.top_win.len(), TOP_WIN);
        assert_eq!(prediction.top_place.len(), TOP_PLACE);
        assert_eq!(prediction.skipped, 0);

        // 7 and 8 are the only runners under four; the tie keeps program order
        assert_eq!(prediction.top_win[0].program_number, 7);
        assert!(prediction
            .top_win
            .windows(2)
            .all(|w| w[0].win_probability >= w[1].win_probability));
        assert!(prediction
            .top_place
            .windows(2)
            .all(|w| w[0].place_probability >= w[1].place_probability));
    }

    #[test]
    fn test_ties_keep_program_order() {
        let mut db = Database::in_memory().unwrap();
        let participants: Vec<_> = (1..=4).map(|n| new_participant(0, n, 8)).collect();
        let race_id = seed_race(&mut db, &participants);

        let prediction = predict_race(&db, &models(), race_id).unwrap();
        let order: Vec<u32> = prediction.top_win.iter().map(|p| p.program_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(prediction.top_place.len(), 4);
    }

    #[test]
    fn test_unusable_participants_are_skipped() {
        let mut db = Database::in_memory().unwrap();
        let mut unusable = new_participant(0, 2, 3);
        unusable.age = None;
        let race_id = seed_race(&mut db, &[new_participant(0, 1, 5), unusable]);

        let prediction = predict_race(&db, &models(), race_id).unwrap();
        assert_eq!(prediction.skipped, 1);
        assert_eq!(prediction.top_win.len(), 1);
        assert_eq!(prediction.top_win[0].program_number, 1);
    }

    #[test]
    fn test_unknown_race() {
        let db = Database::in_memory().unwrap();
        let err = predict_race(&db, &models(), 42).unwrap_err();
        assert!(matches!(err, PredictError::RaceNotFound(42)));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_race_without_participants() {
        let mut db = Database::in_memory().unwrap();
        let race_id = seed_race(&mut db, &[]);
        let err = predict_race(&db, &models(), race_id).unwrap_err();
        assert!(matches!(err, PredictError::NoParticipants(id) if id == race_id));
        assert!(err.to_string().contains("found"));
    }

    #[test]
    fn test_load_models_from_store() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(PredictionModels::load(&store).is_err());

        let trained = models();
        store.save(WIN_MODEL, &trained.win).unwrap();
        store.save(PLACE_MODEL, &trained.place).unwrap();

        let loaded = PredictionModels::load(&store).unwrap();
        assert_eq!(loaded.win, trained.win);
        assert_eq!(loaded.place, trained.place);
    }
}
