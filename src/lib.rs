//! PMU horse-race ingestion, win/place model training and race prediction.

pub mod cli;
pub mod config;
pub mod features;
pub mod model;
pub mod predictor;
pub mod scraper;
pub mod storage;
pub mod trainer;
