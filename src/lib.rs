pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod scope_path;
pub mod services;
pub mod state;

use std::sync::Arc;

use anyhow::Context;

use cli::{Cli, Commands};
use commands::cli_commands;
use config::Settings;
use services::inference_service::{InferenceBackend, OllamaClient};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    logging::init(cli.verbose);

    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("failed to load settings")?;
    tracing::debug!(?settings, "settings loaded");

    let backend: Arc<dyn InferenceBackend> = Arc::new(
        OllamaClient::from_settings(&settings).context("failed to create inference client")?,
    );

    match cli.command {
        Commands::Summarize { dir } => cli_commands::summarize(backend, &settings, &dir).await,
        Commands::Organize(args) => cli_commands::organize(backend, &settings, args).await,
    }
}
