use std::collections::BTreeMap;
use std::path::Path;

use docket_core::validation::{missing_required, validate_record};
use docket_core::{PropertyMap, RecordData};
use serde::Serialize;

use crate::commands::common::{load_schema, read_json};
use crate::error::CliError;

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub complete: bool,
    pub errors: BTreeMap<String, Vec<String>>,
    /// Required properties without a value
    pub missing: Vec<String>,
}

pub fn validate_fixture(schema: &PropertyMap, data: &RecordData) -> ValidationReport {
    let verdict = validate_record(data, schema);
    ValidationReport {
        valid: verdict.is_valid(),
        complete: verdict.complete,
        missing: missing_required(data, schema)
            .into_iter()
            .map(str::to_string)
            .collect(),
        errors: verdict.errors,
    }
}

pub fn run_validate(schema_path: &Path, record_path: &Path, as_json: bool) -> Result<(), CliError> {
    let schema = load_schema(schema_path)?;
    let data: RecordData = read_json(record_path)?;
    let report = validate_fixture(&schema.properties, &data);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_validation(&report) {
            println!("{line}");
        }
    }

    if report.valid {
        Ok(())
    } else {
        Err(CliError::InvalidRecord(report.errors.len()))
    }
}

pub fn format_validation(report: &ValidationReport) -> Vec<String> {
    let mut lines = vec![
        format!("Valid: {}", if report.valid { "yes" } else { "no" }),
        format!("Complete: {}", if report.complete { "yes" } else { "no" }),
    ];
    if !report.missing.is_empty() {
        lines.push(format!("Missing: {}", report.missing.join(", ")));
    }
    for (key, messages) in &report.errors {
        for message in messages {
            lines.push(format!("  {key}: {message}"));
        }
    }
    lines
}
