//! Data models for Docket

mod conflict;
mod draft;
mod ids;
pub mod property;
mod record;

pub use conflict::{ConflictCase, ConflictChoice};
pub use draft::DraftRecord;
pub use ids::{RecordId, RowRef, TableId};
pub use property::{PropertyDefinition, PropertyKind, PropertyMap, PropertyType};
pub use record::{FieldValue, RecordData, RecordSnapshot};
