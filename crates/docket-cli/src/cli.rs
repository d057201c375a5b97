use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Replay inline editing sessions against an in-memory table")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an edit script through an editing session
    Replay {
        /// Property schema (JSON list of property definitions)
        #[arg(long, value_name = "PATH")]
        schema: PathBuf,
        /// Records loaded before the script starts (JSON list)
        #[arg(long, value_name = "PATH")]
        records: Option<PathBuf>,
        /// Edit script (JSON list of steps)
        #[arg(long, value_name = "PATH")]
        script: PathBuf,
        /// Engine configuration (JSON); DOCKET_* variables override it
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate one record against a schema
    Validate {
        /// Property schema (JSON list of property definitions)
        #[arg(long, value_name = "PATH")]
        schema: PathBuf,
        /// Record data (JSON object keyed by property)
        #[arg(long, value_name = "PATH")]
        record: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
