use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] docket_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Could not read {path}: {source}")]
    Fixture {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Unknown row '{0}' (use 'draft', '#<position>' or a record id)")]
    UnknownRow(String),
    #[error("Script step {step} ({op}) failed: {source}")]
    Step {
        step: usize,
        op: &'static str,
        source: docket_core::Error,
    },
    #[error("Record failed validation on {0} field(s)")]
    InvalidRecord(usize),
}
