//! Schema-driven field validation
//!
//! Client-side pre-validation mirroring the server's rules. Every function
//! here is pure: a property definition and a candidate value in, a verdict
//! out. Validation results are state surfaced inline, never errors.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;

use crate::models::property::{FileConfig, NumberConfig, RelationConfig, SelectConfig, TextConfig};
use crate::models::{FieldValue, PropertyDefinition, PropertyKind, PropertyMap, RecordData};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid regex"));

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:localhost|[^\s/?#.:]+(?:\.[^\s/?#.:]+)+)(?::\d{1,5})?(?:[/?#]\S*)?$")
        .expect("Invalid regex")
});

/// Verdict for one field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl FieldValidation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Verdict for a whole record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordValidation {
    /// Messages per property key; only failing keys are present
    pub errors: BTreeMap<String, Vec<String>>,
    /// Whether every required property holds a non-empty value
    pub complete: bool,
}

impl RecordValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Whether a value counts as "not filled in" for the given property type.
///
/// `null`, absent values, blank strings and empty lists are always empty.
/// `false` and `0` are empty too, except for checkbox and number properties
/// where they are legitimate answers.
pub fn is_empty_value(kind: &PropertyKind, value: Option<&FieldValue>) -> bool {
    match value {
        None | Some(FieldValue::Null) => true,
        Some(FieldValue::String(text)) => text.trim().is_empty(),
        Some(FieldValue::Array(items)) => items.is_empty(),
        Some(FieldValue::Bool(flag)) => !flag && !matches!(kind, PropertyKind::Checkbox),
        Some(FieldValue::Number(number)) => {
            number.as_f64() == Some(0.0) && !matches!(kind, PropertyKind::Number(_))
        }
        Some(FieldValue::Object(map)) => map.is_empty(),
    }
}

/// Validate one candidate value against its property definition.
///
/// The required check runs first; type checks only apply to non-empty
/// values. All applicable messages are returned, not just the first.
pub fn validate_field(property: &PropertyDefinition, value: Option<&FieldValue>) -> FieldValidation {
    if is_empty_value(&property.kind, value) {
        return if property.required {
            FieldValidation::from_errors(vec![format!("{} is required", property.name)])
        } else {
            FieldValidation::from_errors(Vec::new())
        };
    }

    let Some(value) = value else {
        return FieldValidation::from_errors(Vec::new());
    };
    let name = property.name.as_str();
    let errors = match &property.kind {
        PropertyKind::Text(config) | PropertyKind::LongText(config) => {
            check_text(name, config, value)
        }
        PropertyKind::Number(config) => check_number(name, config, value),
        PropertyKind::Checkbox => check_checkbox(name, value),
        PropertyKind::Date => check_date(name, value),
        PropertyKind::DateTime => check_datetime(name, value),
        PropertyKind::Select(config) => check_select(name, config, value),
        PropertyKind::MultiSelect(config) => check_multi_select(name, config, value),
        PropertyKind::Email => check_email(name, value),
        PropertyKind::Url => check_url(name, value),
        PropertyKind::File(config) => check_file(name, config, value),
        PropertyKind::Relation(config) => check_relation(name, config, value),
    };
    FieldValidation::from_errors(errors)
}

/// True iff every required property has a non-empty value.
///
/// This gates automatic submission of a draft only; a complete record may
/// still carry a soft error on an optional field.
pub fn is_record_complete(data: &RecordData, schema: &PropertyMap) -> bool {
    schema
        .values()
        .filter(|property| property.required)
        .all(|property| !is_empty_value(&property.kind, data.get(&property.key)))
}

/// Required properties that are still empty, in schema key order
pub fn missing_required<'a>(data: &RecordData, schema: &'a PropertyMap) -> Vec<&'a str> {
    schema
        .values()
        .filter(|property| property.required)
        .filter(|property| is_empty_value(&property.kind, data.get(&property.key)))
        .map(|property| property.key.as_str())
        .collect()
}

/// Validate every property of a record plus keys the schema does not know.
pub fn validate_record(data: &RecordData, schema: &PropertyMap) -> RecordValidation {
    let mut errors = BTreeMap::new();

    for property in schema.values() {
        let result = validate_field(property, data.get(&property.key));
        if !result.valid {
            errors.insert(property.key.clone(), result.errors);
        }
    }

    for key in data.keys().filter(|key| !schema.contains_key(*key)) {
        errors.insert(key.clone(), vec![format!("{key} is not a property of this table")]);
    }

    RecordValidation {
        errors,
        complete: is_record_complete(data, schema),
    }
}

// ---------------------------------------------------------------------------
// Type checks
// ---------------------------------------------------------------------------

fn check_text(name: &str, config: &TextConfig, value: &FieldValue) -> Vec<String> {
    let Some(text) = value.as_str() else {
        return vec![format!("{name} must be text")];
    };
    match config.max_length {
        Some(max) if text.chars().count() > max => {
            vec![format!("{name} must be at most {max} characters")]
        }
        _ => Vec::new(),
    }
}

fn parse_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(number) => number.as_f64(),
        FieldValue::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn check_number(name: &str, config: &NumberConfig, value: &FieldValue) -> Vec<String> {
    let Some(number) = parse_number(value) else {
        return vec![format!("{name} must be a number")];
    };

    let mut errors = Vec::new();
    if config.integer && number.fract() != 0.0 {
        errors.push(format!("{name} must be a whole number"));
    }
    if let Some(min) = config.min {
        if number < min {
            errors.push(format!("{name} must be at least {min}"));
        }
    }
    if let Some(max) = config.max {
        if number > max {
            errors.push(format!("{name} must be at most {max}"));
        }
    }
    errors
}

fn check_checkbox(name: &str, value: &FieldValue) -> Vec<String> {
    if value.is_boolean() {
        Vec::new()
    } else {
        vec![format!("{name} must be checked or unchecked")]
    }
}

fn check_date(name: &str, value: &FieldValue) -> Vec<String> {
    let parsed = value
        .as_str()
        .is_some_and(|text| NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").is_ok());
    if parsed {
        Vec::new()
    } else {
        vec![format!("{name} must be a date (YYYY-MM-DD)")]
    }
}

fn check_datetime(name: &str, value: &FieldValue) -> Vec<String> {
    let parsed = value.as_str().map(str::trim).is_some_and(|text| {
        DateTime::parse_from_rfc3339(text).is_ok()
            || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
            || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M").is_ok()
    });
    if parsed {
        Vec::new()
    } else {
        vec![format!("{name} must be a date and time")]
    }
}

fn check_select(name: &str, config: &SelectConfig, value: &FieldValue) -> Vec<String> {
    match value.as_str() {
        Some(choice) if config.contains(choice) => Vec::new(),
        Some(choice) => vec![format!("'{choice}' is not an option for {name}")],
        None => vec![format!("{name} must be one of the available options")],
    }
}

fn check_multi_select(name: &str, config: &SelectConfig, value: &FieldValue) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return vec![format!("{name} must be a list of options")];
    };

    let mut errors = Vec::new();
    for item in items {
        match item.as_str() {
            Some(choice) if config.contains(choice) => {}
            Some(choice) => errors.push(format!("'{choice}' is not an option for {name}")),
            None => errors.push(format!("{name} must only contain option values")),
        }
    }
    if let Some(max) = config.max_selected {
        if items.len() > max {
            errors.push(format!("{name} allows at most {max} selections"));
        }
    }
    errors
}

fn check_email(name: &str, value: &FieldValue) -> Vec<String> {
    match value.as_str() {
        Some(text) if EMAIL_RE.is_match(text.trim()) => Vec::new(),
        _ => vec![format!("{name} must be a valid email address")],
    }
}

fn check_url(name: &str, value: &FieldValue) -> Vec<String> {
    match value.as_str().map(str::trim) {
        Some(text) if URL_RE.is_match(text) => Vec::new(),
        _ => vec![format!("{name} must be a valid URL starting with http:// or https://")],
    }
}

fn references(value: &FieldValue) -> Option<Vec<&str>> {
    match value {
        FieldValue::String(reference) => Some(vec![reference.as_str()]),
        FieldValue::Array(items) => items.iter().map(FieldValue::as_str).collect(),
        _ => None,
    }
    .filter(|references| references.iter().all(|reference| !reference.trim().is_empty()))
}

fn check_file(name: &str, config: &FileConfig, value: &FieldValue) -> Vec<String> {
    let Some(files) = references(value) else {
        return vec![format!("{name} must reference uploaded files")];
    };
    match config.max_files {
        Some(max) if files.len() > max => vec![format!("{name} allows at most {max} files")],
        _ => Vec::new(),
    }
}

fn check_relation(name: &str, config: &RelationConfig, value: &FieldValue) -> Vec<String> {
    let Some(linked) = references(value) else {
        return vec![format!("{name} must reference records")];
    };
    if !config.allow_multiple && (value.is_array() && linked.len() > 1) {
        return vec![format!("{name} allows only one linked record")];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::property::property_map;
    use crate::models::TableId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn every_kind() -> Vec<PropertyKind> {
        vec![
            PropertyKind::Text(TextConfig::default()),
            PropertyKind::LongText(TextConfig::default()),
            PropertyKind::Number(NumberConfig::default()),
            PropertyKind::Checkbox,
            PropertyKind::Date,
            PropertyKind::DateTime,
            PropertyKind::Select(SelectConfig::new(["a"])),
            PropertyKind::MultiSelect(SelectConfig::new(["a"])),
            PropertyKind::Email,
            PropertyKind::Url,
            PropertyKind::File(FileConfig::default()),
            PropertyKind::Relation(RelationConfig {
                target_table: TableId::new(),
                allow_multiple: true,
            }),
        ]
    }

    #[test]
    fn required_rejects_empty_string_null_and_absent_for_every_type() {
        for kind in every_kind() {
            let property = PropertyDefinition::new("field", kind.clone()).required();
            for value in [Some(json!("")), Some(json!(null)), None] {
                let result = validate_field(&property, value.as_ref());
                assert!(!result.valid, "{} accepted {value:?}", kind.as_str());
                assert_eq!(result.errors, vec!["field is required".to_string()]);
            }
        }
    }

    #[test]
    fn required_accepts_zero_for_number_and_false_for_checkbox() {
        let amount =
            PropertyDefinition::new("amount", PropertyKind::Number(NumberConfig::default()))
                .required();
        assert!(validate_field(&amount, Some(&json!(0))).valid);
        assert!(validate_field(&amount, Some(&json!(0.0))).valid);

        let billable = PropertyDefinition::new("billable", PropertyKind::Checkbox).required();
        assert!(validate_field(&billable, Some(&json!(false))).valid);
    }

    #[test]
    fn optional_empty_values_skip_type_checks() {
        let email = PropertyDefinition::new("email", PropertyKind::Email);
        assert!(validate_field(&email, Some(&json!(""))).valid);
        assert!(validate_field(&email, None).valid);
    }

    #[test]
    fn number_parses_strings_and_reports_all_bound_errors() {
        let property = PropertyDefinition::new(
            "hours",
            PropertyKind::Number(NumberConfig {
                min: Some(1.0),
                max: Some(24.0),
                integer: true,
            }),
        )
        .named("Hours");

        assert!(validate_field(&property, Some(&json!(" 8 "))).valid);
        assert_eq!(
            validate_field(&property, Some(&json!("0.5"))).errors,
            vec![
                "Hours must be a whole number".to_string(),
                "Hours must be at least 1".to_string(),
            ]
        );
        assert_eq!(
            validate_field(&property, Some(&json!("eight"))).errors,
            vec!["Hours must be a number".to_string()]
        );
    }

    #[test]
    fn select_and_multi_select_check_membership() {
        let status = PropertyDefinition::new(
            "status",
            PropertyKind::Select(SelectConfig::new(["open", "closed"])),
        );
        assert!(validate_field(&status, Some(&json!("open"))).valid);
        assert!(!validate_field(&status, Some(&json!("pending"))).valid);

        let tags = PropertyDefinition::new(
            "tags",
            PropertyKind::MultiSelect(SelectConfig {
                max_selected: Some(2),
                ..SelectConfig::new(["a", "b", "c"])
            }),
        );
        assert!(validate_field(&tags, Some(&json!(["a", "c"]))).valid);
        let result = validate_field(&tags, Some(&json!(["a", "x", "y"])));
        assert_eq!(
            result.errors,
            vec![
                "'x' is not an option for tags".to_string(),
                "'y' is not an option for tags".to_string(),
                "tags allows at most 2 selections".to_string(),
            ]
        );
    }

    #[test]
    fn email_and_url_patterns() {
        let email = PropertyDefinition::new("email", PropertyKind::Email);
        assert!(validate_field(&email, Some(&json!("counsel@firm.law"))).valid);
        assert!(!validate_field(&email, Some(&json!("counsel@firm"))).valid);
        assert!(!validate_field(&email, Some(&json!("two words@firm.law"))).valid);

        let url = PropertyDefinition::new("site", PropertyKind::Url);
        assert!(validate_field(&url, Some(&json!("https://court.gov/docket?id=4"))).valid);
        assert!(validate_field(&url, Some(&json!("http://localhost:8080/x"))).valid);
        assert!(!validate_field(&url, Some(&json!("court.gov"))).valid);
        assert!(!validate_field(&url, Some(&json!("ftp://court.gov"))).valid);
        assert!(!validate_field(&url, Some(&json!("https://court gov"))).valid);
    }

    #[test]
    fn date_and_datetime_formats() {
        let date = PropertyDefinition::new("filed", PropertyKind::Date);
        assert!(validate_field(&date, Some(&json!("2024-02-29"))).valid);
        assert!(!validate_field(&date, Some(&json!("2023-02-29"))).valid);

        let datetime = PropertyDefinition::new("hearing", PropertyKind::DateTime);
        assert!(validate_field(&datetime, Some(&json!("2024-05-01T09:30"))).valid);
        assert!(validate_field(&datetime, Some(&json!("2024-05-01T09:30:00Z"))).valid);
        assert!(!validate_field(&datetime, Some(&json!("tomorrow"))).valid);
    }

    #[test]
    fn relation_respects_allow_multiple() {
        let single = PropertyDefinition::new(
            "client",
            PropertyKind::Relation(RelationConfig {
                target_table: TableId::new(),
                allow_multiple: false,
            }),
        );
        assert!(validate_field(&single, Some(&json!("rec-1"))).valid);
        assert!(validate_field(&single, Some(&json!(["rec-1"]))).valid);
        assert!(!validate_field(&single, Some(&json!(["rec-1", "rec-2"]))).valid);
        assert!(!validate_field(&single, Some(&json!(42))).valid);
    }

    #[test]
    fn file_limits_count() {
        let receipts = PropertyDefinition::new(
            "receipts",
            PropertyKind::File(FileConfig { max_files: Some(1) }),
        );
        assert!(validate_field(&receipts, Some(&json!("uploads/r1.pdf"))).valid);
        assert!(!validate_field(&receipts, Some(&json!(["a.pdf", "b.pdf"]))).valid);
    }

    #[test]
    fn completeness_tracks_required_fields_only() {
        let schema = property_map([
            PropertyDefinition::new("title", PropertyKind::Text(TextConfig::default())).required(),
            PropertyDefinition::new("amount", PropertyKind::Number(NumberConfig::default()))
                .required(),
            PropertyDefinition::new("email", PropertyKind::Email),
        ])
        .unwrap();

        let mut data = RecordData::from([("title".to_string(), json!("Filing fee"))]);
        assert!(!is_record_complete(&data, &schema));
        assert_eq!(missing_required(&data, &schema), vec!["amount"]);

        data.insert("amount".into(), json!(0));
        data.insert("email".into(), json!("not-an-email"));
        assert!(is_record_complete(&data, &schema));

        let report = validate_record(&data, &schema);
        assert!(report.complete);
        assert!(!report.is_valid());
        assert_eq!(report.errors.keys().collect::<Vec<_>>(), vec!["email"]);
    }

    #[test]
    fn validate_record_flags_unknown_keys() {
        let schema =
            property_map([PropertyDefinition::new("title", PropertyKind::Text(TextConfig::default()))])
                .unwrap();
        let data = RecordData::from([("colour".to_string(), json!("red"))]);
        let report = validate_record(&data, &schema);
        assert!(report.errors.contains_key("colour"));
    }
}
