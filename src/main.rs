//! pmu-ai command line entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pmu_ai::cli::{self, Cli, Commands};
use pmu_ai::config::AppConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pmu_ai=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = AppConfig::load()?;
    cli::apply_overrides(&mut config, &cli);
    tracing::debug!("Configuration: {:?}", config);

    match cli.command {
        Commands::Scrape { start, end } => cli::run_scrape(&config, start, end),
        Commands::Train => cli::run_train(&config),
        Commands::Predict { race_id, format } => cli::run_predict(&config, race_id, format),
    }
}
