use std::fs;
use std::path::Path;

use docket_core::models::property::property_map;
use docket_core::util::unix_millis_now;
use docket_core::{
    EngineConfig, FieldValue, PropertyDefinition, PropertyMap, RecordData, RecordId,
    RecordSnapshot, RowRef, SaveState, TableId,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::CliError;

/// A table schema read from disk
#[derive(Debug)]
pub struct LoadedSchema {
    pub table_id: TableId,
    pub properties: PropertyMap,
}

#[derive(Debug, Deserialize)]
struct TableFixture {
    #[serde(default)]
    table_id: Option<TableId>,
    properties: Vec<PropertyDefinition>,
}

#[derive(Debug, Deserialize)]
struct RecordFixture {
    #[serde(default)]
    id: Option<RecordId>,
    #[serde(default = "first_version")]
    version: u64,
    data: RecordData,
}

const fn first_version() -> u64 {
    1
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| CliError::Fixture {
        path: path.to_path_buf(),
        source,
    })
}

fn from_fixture_value<T: DeserializeOwned>(
    path: &Path,
    value: serde_json::Value,
) -> Result<T, CliError> {
    serde_json::from_value(value).map_err(|source| CliError::Fixture {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a schema given either as a list of property definitions or as
/// `{ "table_id": ..., "properties": [...] }`.
pub fn load_schema(path: &Path) -> Result<LoadedSchema, CliError> {
    let value: serde_json::Value = read_json(path)?;
    let fixture = if value.is_array() {
        TableFixture {
            table_id: None,
            properties: from_fixture_value(path, value)?,
        }
    } else {
        from_fixture_value(path, value)?
    };

    let properties = property_map(fixture.properties)?;
    Ok(LoadedSchema {
        table_id: fixture.table_id.unwrap_or_default(),
        properties,
    })
}

/// Load records as persisted snapshots of `table_id`.
///
/// Missing ids are generated and missing versions start at 1.
pub fn load_records(path: Option<&Path>, table_id: TableId) -> Result<Vec<RecordSnapshot>, CliError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let fixtures: Vec<RecordFixture> = read_json(path)?;
    let now = unix_millis_now();
    Ok(fixtures
        .into_iter()
        .map(|fixture| RecordSnapshot {
            id: fixture.id.unwrap_or_default(),
            table_id,
            data: fixture.data,
            version: fixture.version,
            last_modified: now,
        })
        .collect())
}

/// Engine config from an optional JSON file, with `DOCKET_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let config = match path {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?.with_env_overrides()?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

/// Resolve `draft`, `#<position>` (1-based, in load order) or a record id.
pub fn parse_row(selector: &str, records: &[RecordId]) -> Result<RowRef, CliError> {
    let trimmed = selector.trim();
    if let Some(position) = trimmed.strip_prefix('#') {
        return position
            .parse::<usize>()
            .ok()
            .and_then(|position| position.checked_sub(1))
            .and_then(|index| records.get(index))
            .map(|id| RowRef::Record(*id))
            .ok_or_else(|| CliError::UnknownRow(selector.to_string()));
    }
    trimmed
        .parse::<RowRef>()
        .map_err(|_| CliError::UnknownRow(selector.to_string()))
}

pub fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::String(text) => text.clone(),
        FieldValue::Null => "-".to_string(),
        other => other.to_string(),
    }
}

pub fn format_save_state(state: &SaveState) -> String {
    match state {
        SaveState::Idle => "idle".to_string(),
        SaveState::Pending => "pending".to_string(),
        SaveState::Saving => "saving".to_string(),
        SaveState::Failed(error) => format!("failed: {error}"),
        SaveState::Conflicted => "conflicted".to_string(),
    }
}

pub fn format_record_line(id: RecordId, version: u64, state: &SaveState, data: &RecordData) -> String {
    let fields = data
        .iter()
        .map(|(key, value)| format!("{key}={}", format_value(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{id}  v{version}  [{}]  {fields}", format_save_state(state))
}
