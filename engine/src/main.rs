// Steward agent runtime
// Main entry point for the steward binary

use clap::Parser;
use steward_engine::cli::{Cli, Command};
use steward_engine::config::Config;
use steward_engine::handlers::{handle_config, handle_run, OutputFormat};
use steward_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!("Steward v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Run { prompt } => handle_run(prompt, &config, format).await,
        Command::Config => handle_config(&config, format),
    }
}
