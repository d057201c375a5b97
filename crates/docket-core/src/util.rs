//! Shared utility functions used across multiple modules.

use crate::models::FieldValue;

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether a value carries no user data at all.
///
/// `null`, whitespace-only strings and empty arrays are blank. Unlike the
/// type-aware emptiness used by validation, `false` and `0` count as data.
pub fn is_blank(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::String(text) => text.trim().is_empty(),
        FieldValue::Array(items) => items.is_empty(),
        _ => false,
    }
}
