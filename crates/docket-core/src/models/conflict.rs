//! Version conflict model

use serde::{Deserialize, Serialize};

use crate::models::{RecordData, RecordId};

/// A write that assumed a version the server no longer holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCase {
    /// Record involved in the conflict
    pub record_id: RecordId,
    /// Local view of the record (confirmed data plus unsent edits)
    pub local_data: RecordData,
    /// Server's current data
    pub server_data: RecordData,
    /// Version the rejected write was based on
    pub local_version: u64,
    /// Version the server currently holds
    pub server_version: u64,
    /// When the conflict was detected (Unix ms)
    pub raised_at: i64,
}

impl ConflictCase {
    /// Keys whose local value differs from the server's
    #[must_use]
    pub fn diverging_keys(&self) -> Vec<&str> {
        self.local_data
            .keys()
            .chain(self.server_data.keys())
            .filter(|key| self.local_data.get(*key) != self.server_data.get(*key))
            .map(String::as_str)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Operator's decision for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Resubmit local data against the server version
    KeepLocal,
    /// Drop local changes and adopt the server data
    UseServer,
    /// Resubmit an externally merged payload
    Merge,
}

impl ConflictChoice {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::UseServer => "use_server",
            Self::Merge => "merge",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diverging_keys_covers_both_sides() {
        let case = ConflictCase {
            record_id: RecordId::new(),
            local_data: RecordData::from([
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!("same")),
            ]),
            server_data: RecordData::from([
                ("b".to_string(), json!("same")),
                ("c".to_string(), json!(true)),
            ]),
            local_version: 1,
            server_version: 2,
            raised_at: 0,
        };
        assert_eq!(case.diverging_keys(), vec!["a", "c"]);
    }

    #[test]
    fn choice_uses_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(ConflictChoice::KeepLocal).unwrap(),
            json!("keep_local")
        );
        let parsed: ConflictChoice = serde_json::from_value(json!("use_server")).unwrap();
        assert_eq!(parsed, ConflictChoice::UseServer);
    }
}
