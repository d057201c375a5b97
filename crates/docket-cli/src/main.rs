//! Docket CLI - Replay inline editing sessions from the terminal
//!
//! Feeds JSON fixtures (schema, records, edit script) through the editing
//! engine against an in-memory repository.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::completions::run_completions;
use crate::commands::replay::run_replay;
use crate::commands::validate::run_validate;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docket=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            schema,
            records,
            script,
            config,
            json,
        } => {
            run_replay(
                &schema,
                records.as_deref(),
                &script,
                config.as_deref(),
                json,
            )
            .await?;
        }
        Commands::Validate {
            schema,
            record,
            json,
        } => run_validate(&schema, &record, json)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
