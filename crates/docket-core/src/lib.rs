//! docket-core - Inline record editing engine for Docket
//!
//! This crate holds the schema-driven validation, active-cell tracking,
//! draft rows, debounced autosave and optimistic sync used by every Docket
//! table view.

pub mod autosave;
pub mod config;
pub mod draft;
pub mod editing;
pub mod error;
pub mod events;
pub mod models;
pub mod repository;
pub mod session;
pub mod sync;
pub mod util;
pub mod validation;

pub use config::EngineConfig;
pub use editing::{ActiveCell, Direction, GridLayout};
pub use error::{Error, Result};
pub use events::EngineEvent;
pub use models::{
    ConflictCase, ConflictChoice, FieldValue, PropertyDefinition, PropertyKind, PropertyMap,
    RecordData, RecordId, RecordSnapshot, RowRef, TableId,
};
pub use repository::{MemoryRepository, MemorySchemaService, Repository, SchemaService};
pub use session::{EditingSession, SaveState};
