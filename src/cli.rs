//! CLI commands for pmu-ai.
//!
//! Supports scraping a date range into SQLite, training the win/place
//! models and predicting a stored race.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::model::ModelStore;
use crate::predictor::{predict_race, PredictError, PredictionModels, RacePrediction};
use crate::scraper::{scrape_range, PmuClient};
use crate::storage::Database;
use crate::trainer::{train, TrainingReport};

/// Date format accepted on the command line
pub const CLI_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Parser)]
#[command(name = "pmu-ai")]
#[command(version, about = "PMU race ingestion, model training and prediction", long_about = None)]
pub struct Cli {
    /// SQLite database path override
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Model directory override
    #[arg(long, global = true, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch programmes and participants for a date range
    Scrape {
        /// First date (DD-MM-YYYY)
        #[arg(value_parser = parse_date)]
        start: NaiveDate,

        /// Last date, inclusive (DD-MM-YYYY)
        #[arg(value_parser = parse_date)]
        end: NaiveDate,
    },

    /// Train the win and place models on stored results
    Train,

    /// Predict a stored race
    Predict {
        /// Race id
        race_id: i64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, CLI_DATE_FORMAT)
        .map_err(|_| format!("invalid date '{}', expected DD-MM-YYYY", s))
}

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(path) = &cli.database {
        config.database.path = path.to_string_lossy().to_string();
    }
    if let Some(dir) = &cli.model_dir {
        config.model.dir = dir.to_string_lossy().to_string();
    }
}

fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let path = Path::new(&config.database.path);
    Database::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Run the scraper over `[start, end]`.
pub fn run_scrape(config: &AppConfig, start: NaiveDate, end: NaiveDate) -> anyhow::Result<()> {
    let mut db = open_database(config)?;
    let client = PmuClient::new(&config.api)?;

    eprintln!(
        "Scraping {} to {} into {}",
        start.format(CLI_DATE_FORMAT),
        end.format(CLI_DATE_FORMAT),
        config.database.path
    );
    let summary = scrape_range(&client, &mut db, start, end, config.api.max_meetings_per_day)?;

    println!("Dates:                  {}", summary.dates);
    println!("Meetings:               {}", summary.meetings);
    println!("New races:              {}", summary.races_inserted);
    println!("New participants:       {}", summary.participants_inserted);
    println!("Refreshed participants: {}", summary.participants_refreshed);
    println!("Skipped meetings:       {}", summary.skipped_meetings);
    println!("Skipped races:          {}", summary.skipped_races);
    Ok(())
}

/// Train both models and print held-out metrics.
pub fn run_train(config: &AppConfig) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let store = ModelStore::new(&config.model.dir);

    eprintln!("Training from {}", config.database.path);
    let report = train(&db, &config.training, &store)?;
    print_training_report(&report);
    Ok(())
}

fn print_training_report(report: &TrainingReport) {
    println!(
        "Rows: {} train, {} test ({} excluded)",
        report.n_train, report.n_test, report.excluded
    );
    println!();
    println!("=== Win Model ===");
    println!("  {}", report.win);
    println!("  saved to {}", report.win_path.display());
    println!();
    println!("=== Place Model ===");
    println!("  {}", report.place);
    println!("  saved to {}", report.place_path.display());
}

/// Predict a stored race.
pub fn run_predict(config: &AppConfig, race_id: i64, format: OutputFormat) -> anyhow::Result<()> {
    let store = ModelStore::new(&config.model.dir);
    eprintln!("Loading models from: {}", config.model.dir);
    let models = PredictionModels::load(&store)?;

    let db = open_database(config)?;

    let prediction = match predict_race(&db, &models, race_id) {
        Ok(prediction) => prediction,
        Err(err @ (PredictError::RaceNotFound(_) | PredictError::NoParticipants(_))) => {
            eprintln!("{}", err);
            return Ok(());
        }
        Err(PredictError::Storage(err)) => return Err(err),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&prediction)?),
        OutputFormat::Table => print_table(&prediction),
    }
    Ok(())
}

/// Print prediction results in table format.
fn print_table(prediction: &RacePrediction) {
    println!(
        "Race: {} (id {}) {}",
        prediction.race,
        prediction.race_id,
        prediction.name.as_deref().unwrap_or("")
    );
    println!("Start: {}", prediction.start_time.format("%Y-%m-%d %H:%M UTC"));
    if prediction.skipped > 0 {
        println!("({} participants skipped for missing data)", prediction.skipped);
    }
    println!();

    println!("=== Win Probabilities ===");
    for (i, p) in prediction.top_win.iter().enumerate() {
        println!(
            "  {:2}. #{:<3} {:<24} {:.2}%",
            i + 1,
            p.program_number,
            p.name.as_deref().unwrap_or("-"),
            p.win_probability * 100.0
        );
    }
    println!();

    println!("=== Place Probabilities ===");
    for (i, p) in prediction.top_place.iter().enumerate() {
        println!(
            "  {:2}. #{:<3} {:<24} {:.2}%",
            i + 1,
            p.program_number,
            p.name.as_deref().unwrap_or("-"),
            p.place_probability * 100.0
        );
    }
}
