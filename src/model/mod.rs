//! Win/place classifiers: random forest, evaluation metrics and persistence.

pub mod forest;
pub mod metrics;
pub mod store;

pub use forest::{ForestConfig, RandomForest};
pub use metrics::ClassificationMetrics;
pub use store::{ModelStore, PLACE_MODEL, WIN_MODEL};
