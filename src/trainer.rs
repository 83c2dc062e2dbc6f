//! Training driver for the win and place classifiers.
//!
//! Builds the training table from finished participants, splits it with a
//! seeded shuffle, fits both forests on the same rows and persists them.

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::TrainingConfig;
use crate::features::{FeatureBuilder, FEATURE_NAMES, NUM_FEATURES};
use crate::model::{
    ClassificationMetrics, ForestConfig, ModelStore, RandomForest, PLACE_MODEL, WIN_MODEL,
};
use crate::storage::Database;

/// Feature matrix with both label columns
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Array2<f64>,
    pub won: Array1<f64>,
    pub placed: Array1<f64>,
    /// Finished participants dropped for a missing feature
    pub excluded: usize,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub n_train: usize,
    pub n_test: usize,
    pub excluded: usize,
    pub win: ClassificationMetrics,
    pub place: ClassificationMetrics,
    pub win_path: PathBuf,
    pub place_path: PathBuf,
}

/// Assemble features and labels for every finished participant
pub fn build_training_set(db: &Database) -> Result<TrainingSet> {
    let entries = db
        .get_finished_entries()
        .context("Failed to load finished participants")?;

    let mut rows: Vec<f64> = Vec::with_capacity(entries.len() * NUM_FEATURES);
    let mut won = Vec::with_capacity(entries.len());
    let mut placed = Vec::with_capacity(entries.len());
    let mut excluded = 0;

    for (participant, race) in &entries {
        match FeatureBuilder::derive_training(participant, race) {
            Ok((features, labels)) => {
                rows.extend_from_slice(&features.to_array());
                won.push(labels.won);
                placed.push(labels.placed);
            }
            Err(reason) => {
                excluded += 1;
                debug!(
                    "Excluding participant {} of race {}: {}",
                    participant.program_number,
                    race.id,
                    reason
                );
            }
        }
    }

    if excluded > 0 {
        info!(
            "Excluded {} of {} finished participants with missing features",
            excluded,
            entries.len()
        );
    }

    let n = won.len();
    Ok(TrainingSet {
        features: Array2::from_shape_vec((n, NUM_FEATURES), rows)?,
        won: Array1::from_vec(won),
        placed: Array1::from_vec(placed),
        excluded,
    })
}

/// Shuffle row indices and cut off the test share
pub fn train_test_split(n: usize, test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n as f64 * test_ratio).round() as usize).min(n.saturating_sub(1));
    let train = indices.split_off(n_test);
    (train, indices)
}

fn fit_and_evaluate(
    name: &str,
    forest_config: &ForestConfig,
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    x_test: &Array2<f64>,
    y_test: &Array1<f64>,
) -> Result<(RandomForest, ClassificationMetrics)> {
    info!("Fitting {} ({} trees)", name, forest_config.n_trees);
    let mut forest = RandomForest::new(forest_config.clone());
    forest.fit(x_train.view(), y_train.view(), &FEATURE_NAMES)?;

    let predictions = forest.predict(x_test.view());
    let metrics = ClassificationMetrics::compute(y_test.view(), predictions.view());
    info!("{}: {}", name, metrics);
    Ok((forest, metrics))
}

/// Train both classifiers and write them to the model store
pub fn train(db: &Database, config: &TrainingConfig, store: &ModelStore) -> Result<TrainingReport> {
    if !(0.0..1.0).contains(&config.test_ratio) {
        bail!("test_ratio must be in [0, 1), got {}", config.test_ratio);
    }

    let set = build_training_set(db)?;
    if set.is_empty() {
        bail!("No finished participants with complete features to train on");
    }

    let (train_idx, test_idx) = train_test_split(set.len(), config.test_ratio, config.seed);
    if test_idx.is_empty() {
        warn!("Held-out set is empty; metrics will be zero");
    }
    info!(
        "Training on {} rows, evaluating on {}",
        train_idx.len(),
        test_idx.len()
    );

    let x_train = set.features.select(Axis(0), &train_idx);
    let x_test = set.features.select(Axis(0), &test_idx);

    let forest_config = ForestConfig {
        n_trees: config.n_trees,
        max_depth: config.max_depth,
        seed: config.seed,
        ..Default::default()
    };

    let (win_model, win) = fit_and_evaluate(
        WIN_MODEL,
        &forest_config,
        &x_train,
        &set.won.select(Axis(0), &train_idx),
        &x_test,
        &set.won.select(Axis(0), &test_idx),
    )?;
    let (place_model, place) = fit_and_evaluate(
        PLACE_MODEL,
        &forest_config,
        &x_train,
        &set.placed.select(Axis(0), &train_idx),
        &x_test,
        &set.placed.select(Axis(0), &test_idx),
    )?;

    let win_path = store.save(WIN_MODEL, &win_model)?;
    let place_path = store.save(PLACE_MODEL, &place_model)?;

    Ok(TrainingReport {
        n_train: train_idx.len(),
        n_test: test_idx.len(),
        excluded: set.excluded,
        win,
        place,
        win_path,
        place_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::{NewParticipant, NewRace};
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::TempDir;

    fn new_race(order_number: u32) -> NewRace {
        NewRace {
            meeting_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            meeting_number: 1,
            order_number,
            name: None,
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap(),
            distance: Some(2700),
            discipline: Some("ATTELE".to_string()),
            specialty: None,
            track_bias: Some("CORDE_GAUCHE".to_string()),
            prize_money: None,
            declared_runners: None,
            venue_code: None,
        }
    }

    fn new_participant(race_id: i64, number: u32, order: Option<u32>) -> NewParticipant {
        NewParticipant {
            race_id,
            program_number: number,
            name: None,
            // Younger horses finish first, so age alone separates the labels
            age: order.map(|o| o + 2).or(Some(5)),
            sex: Some("MALES".to_string()),
            form: Some("1a 2a".to_string()),
            odds: None,
            commentary: None,
            finishing_order: order,
            driver: None,
            trainer: None,
        }
    }

    /// 25 races of 6 finishers, plus one unusable and one unfinished entry
    fn separable_db() -> Database {
        let mut db = Database::in_memory().unwrap();
        let uow = db.begin().unwrap();
        for order_number in 1..=25 {
            let race_id = uow.insert_race(&new_race(order_number)).unwrap();
            for n in 1..=6 {
                uow.insert_participant(&new_participant(race_id, n, Some(n)))
                    .unwrap();
            }
            if order_number == 1 {
                let mut unusable = new_participant(race_id, 7, Some(7));
                unusable.sex = Some("INCONNU".to_string());
                uow.insert_participant(&unusable).unwrap();
                uow.insert_participant(&new_participant(race_id, 8, None))
                    .unwrap();
            }
        }
        uow.commit().unwrap();
        db
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            n_trees: 10,
            max_depth: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_training_set_excludes_and_counts() {
        let db = separable_db();
        let set = build_training_set(&db).unwrap();
        assert_eq!(set.len(), 150);
        assert_eq!(set.excluded, 1);
        assert_eq!(set.features.ncols(), NUM_FEATURES);
        assert_eq!(set.won.sum(), 25.0);
        assert_eq!(set.placed.sum(), 75.0);
    }

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let (train_a, test_a) = train_test_split(100, 0.2, 42);
        let (train_b, test_b) = train_test_split(100, 0.2, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(train_a.len(), 80);
        assert_eq!(test_a.len(), 20);
        assert!(test_a.iter().all(|i| !train_a.contains(i)));

        let (_, test_c) = train_test_split(100, 0.2, 7);
        assert_ne!(test_a, test_c);
    }

    #[test]
    fn test_split_keeps_one_training_row() {
        let (train, test) = train_test_split(1, 0.5, 42);
        assert_eq!(train.len(), 1);
        assert!(test.is_empty());
    }

    #[test]
    fn test_train_persists_reloadable_models() {
        let db = separable_db();
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());

        let report = train(&db, &small_config(), &store).unwrap();
        assert_eq!(report.n_train + report.n_test, 150);
        assert_eq!(report.n_test, 30);
        assert_eq!(report.excluded, 1);

        for metrics in [report.win, report.place] {
            for value in [metrics.accuracy, metrics.precision, metrics.recall, metrics.f1] {
                assert!((0.0..=1.0).contains(&value));
            }
        }
        assert!(report.win.accuracy > 0.9);
        assert!(report.place.accuracy > 0.9);

        let win = store.load(WIN_MODEL).unwrap();
        let place = store.load(PLACE_MODEL).unwrap();
        assert_eq!(win.feature_names(), &FEATURE_NAMES[..]);
        assert_eq!(place.n_trees(), 10);
    }

    #[test]
    fn test_train_on_empty_table_fails() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let err = train(&db, &small_config(), &ModelStore::new(dir.path())).unwrap_err();
        assert!(err.to_string().contains("No finished participants"));
        assert!(!dir.path().join("win_model.json").exists());
    }

    #[test]
    fn test_train_rejects_bad_ratio() {
        let db = separable_db();
        let dir = TempDir::new().unwrap();
        let config = TrainingConfig {
            test_ratio: 1.0,
            ..small_config()
        };
        assert!(train(&db, &config, &ModelStore::new(dir.path())).is_err());
    }
}
