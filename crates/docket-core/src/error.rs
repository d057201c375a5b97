//! Error types for docket-core
//!
//! Validation failures and version conflicts are not errors: the engine keeps
//! them as state (inline field errors, `ConflictCase`). Everything here is
//! either a repository failure or a broken contract with the caller.

use thiserror::Error;

use crate::models::RecordId;

/// Result type alias using docket-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in docket-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Network or server failure unrelated to versioning
    #[error("Save failed: {0}")]
    Save(String),

    /// Operation targeted a cell or record that no longer exists
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Property key is not part of the table schema
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// Record is not loaded in this session
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// A draft row is already open for this table view
    #[error("A draft record is already in progress")]
    DraftInProgress,

    /// Operation requires an open draft row
    #[error("No draft record is in progress")]
    NoDraft,

    /// No unresolved conflict exists for the record
    #[error("No pending conflict for record: {0}")]
    NoConflict(RecordId),

    /// `merge` resolution was requested without a merged payload
    #[error("Merge resolution requires a merged payload")]
    MergePayloadRequired,

    /// Property schema could not be interpreted
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Engine configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Text could not be parsed into the requested value
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
