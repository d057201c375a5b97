//! In-progress new record

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::RecordData;
use crate::util::{is_blank, unix_millis_now};

/// The row a user fills in before the record exists on the server.
///
/// It has no id: grid cells address it through `RowRef::Draft`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    /// Values entered so far
    pub data: RecordData,
    /// Messages per property whose last value failed validation
    pub validation_errors: BTreeMap<String, Vec<String>>,
    /// Last edit timestamp (Unix ms)
    pub last_modified: i64,
}

impl DraftRecord {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RecordData::new(),
            validation_errors: BTreeMap::new(),
            last_modified: unix_millis_now(),
        }
    }

    /// Whether any field holds user data
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.data.values().any(|value| !is_blank(value))
    }

    /// Whether every entered value passed validation
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_errors.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_content() {
        let mut draft = DraftRecord::new();
        assert!(!draft.has_content());

        draft.data.insert("title".into(), json!("   "));
        assert!(!draft.has_content());

        draft.data.insert("billable".into(), json!(false));
        assert!(draft.has_content());
    }

    #[test]
    fn test_is_valid() {
        let mut draft = DraftRecord::new();
        assert!(draft.is_valid());
        draft.validation_errors.insert("amount".into(), Vec::new());
        assert!(draft.is_valid());
        draft
            .validation_errors
            .insert("email".into(), vec!["Email is not a valid email address".into()]);
        assert!(!draft.is_valid());
    }
}
