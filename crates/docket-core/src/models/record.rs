//! Persisted record snapshot

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{RecordId, TableId};

/// A single cell value. Records are schema-less on the wire, so values stay
/// JSON until validation interprets them against a property definition.
pub type FieldValue = serde_json::Value;

/// Property key to value mapping of one record
pub type RecordData = BTreeMap<String, FieldValue>;

/// The last state of a record known to be persisted on the server.
///
/// Snapshots are replaced wholesale on every successful sync and never
/// patched in place; unconfirmed local edits live beside them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Server-assigned identifier
    pub id: RecordId,
    /// Table the record belongs to
    pub table_id: TableId,
    /// Field values
    pub data: RecordData,
    /// Monotonic version stamp, advanced by one per accepted write
    pub version: u64,
    /// Last update timestamp (Unix ms)
    pub last_modified: i64,
}

impl RecordSnapshot {
    /// Value of one property, if set
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_roundtrips_through_json() {
        let snapshot = RecordSnapshot {
            id: RecordId::new(),
            table_id: TableId::new(),
            data: RecordData::from([("title".to_string(), json!("Smith v. Jones"))]),
            version: 4,
            last_modified: 1_700_000_000_000,
        };
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: RecordSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.value("title"), Some(&json!("Smith v. Jones")));
    }
}
