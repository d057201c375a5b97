//! Property definitions: the per-tenant schema that drives validation.
//!
//! On the wire a property is `{key, name, type, required, config,
//! display_order}` with a free-form `config` object. It is parsed once into
//! [`PropertyKind`], a closed union whose variants carry their own typed
//! configuration, so every consumer dispatches exhaustively.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::TableId;

/// Schema of a table, keyed by property key
pub type PropertyMap = BTreeMap<String, PropertyDefinition>;

/// Schema description of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPropertyDefinition", into = "RawPropertyDefinition")]
pub struct PropertyDefinition {
    /// Unique, immutable key within the schema
    pub key: String,
    /// Human-readable label used in messages
    pub name: String,
    /// Whether a non-empty value is needed for the record to be complete
    pub required: bool,
    /// Column position in the grid
    pub display_order: i32,
    /// Type with its type-specific constraints
    pub kind: PropertyKind,
}

impl PropertyDefinition {
    /// Create a definition whose label equals its key
    pub fn new(key: impl Into<String>, kind: PropertyKind) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            required: false,
            display_order: 0,
            kind,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn at(mut self, display_order: i32) -> Self {
        self.display_order = display_order;
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Closed set of property types with their configuration
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Text(TextConfig),
    LongText(TextConfig),
    Number(NumberConfig),
    Checkbox,
    Date,
    DateTime,
    Select(SelectConfig),
    MultiSelect(SelectConfig),
    Email,
    Url,
    File(FileConfig),
    Relation(RelationConfig),
}

impl PropertyKind {
    /// Wire name of the type
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.property_type().as_str()
    }

    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::Text(_) => PropertyType::Text,
            Self::LongText(_) => PropertyType::LongText,
            Self::Number(_) => PropertyType::Number,
            Self::Checkbox => PropertyType::Checkbox,
            Self::Date => PropertyType::Date,
            Self::DateTime => PropertyType::DateTime,
            Self::Select(_) => PropertyType::Select,
            Self::MultiSelect(_) => PropertyType::MultiSelect,
            Self::Email => PropertyType::Email,
            Self::Url => PropertyType::Url,
            Self::File(_) => PropertyType::File,
            Self::Relation(_) => PropertyType::Relation,
        }
    }
}

/// Type tag as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Text,
    LongText,
    Number,
    Checkbox,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    Select,
    MultiSelect,
    Email,
    Url,
    File,
    Relation,
}

impl PropertyType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::LongText => "long_text",
            Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
            Self::Email => "email",
            Self::Url => "url",
            Self::File => "file",
            Self::Relation => "relation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Reject fractional values
    pub integer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectConfig {
    pub options: Vec<SelectOption>,
    /// Upper bound on chosen options (multi_select only)
    pub max_selected: Option<usize>,
}

impl SelectConfig {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: values.into_iter().map(SelectOption::new).collect(),
            max_selected: None,
        }
    }

    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.options.iter().any(|option| option.value == value)
    }
}

/// One choice of a select or multi_select property.
///
/// Accepts either a bare string or `{value, label, color}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSelectOption")]
pub struct SelectOption {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SelectOption {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: None,
            color: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelectOption {
    Plain(String),
    Detailed {
        value: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
}

impl From<RawSelectOption> for SelectOption {
    fn from(raw: RawSelectOption) -> Self {
        match raw {
            RawSelectOption::Plain(value) => Self::new(value),
            RawSelectOption::Detailed {
                value,
                label,
                color,
            } => Self {
                value,
                label,
                color,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub max_files: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub target_table: TableId,
    #[serde(default)]
    pub allow_multiple: bool,
}

/// Order properties for display: by `display_order`, then key.
pub fn ordered(schema: &PropertyMap) -> Vec<&PropertyDefinition> {
    let mut properties: Vec<&PropertyDefinition> = schema.values().collect();
    properties.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.key.cmp(&b.key))
    });
    properties
}

/// Build a schema map from a list of definitions, rejecting duplicate keys.
pub fn property_map(
    definitions: impl IntoIterator<Item = PropertyDefinition>,
) -> Result<PropertyMap> {
    let mut map = PropertyMap::new();
    for definition in definitions {
        if map.contains_key(&definition.key) {
            return Err(Error::InvalidSchema(format!(
                "duplicate property key '{}'",
                definition.key
            )));
        }
        map.insert(definition.key.clone(), definition);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPropertyDefinition {
    key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    property_type: PropertyType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    display_order: i32,
}

impl TryFrom<RawPropertyDefinition> for PropertyDefinition {
    type Error = Error;

    fn try_from(raw: RawPropertyDefinition) -> Result<Self> {
        let key = raw.key.trim().to_string();
        if key.is_empty() {
            return Err(Error::InvalidSchema("property key must not be empty".into()));
        }

        let config = raw.config;
        let kind = match raw.property_type {
            PropertyType::Text => PropertyKind::Text(parse_config(&key, config)?),
            PropertyType::LongText => PropertyKind::LongText(parse_config(&key, config)?),
            PropertyType::Number => PropertyKind::Number(parse_config(&key, config)?),
            PropertyType::Checkbox => PropertyKind::Checkbox,
            PropertyType::Date => PropertyKind::Date,
            PropertyType::DateTime => PropertyKind::DateTime,
            PropertyType::Select => PropertyKind::Select(parse_config(&key, config)?),
            PropertyType::MultiSelect => PropertyKind::MultiSelect(parse_config(&key, config)?),
            PropertyType::Email => PropertyKind::Email,
            PropertyType::Url => PropertyKind::Url,
            PropertyType::File => PropertyKind::File(parse_config(&key, config)?),
            PropertyType::Relation => {
                let relation = serde_json::from_value::<RelationConfig>(config).map_err(|error| {
                    Error::InvalidSchema(format!(
                        "relation property '{key}' needs a target_table: {error}"
                    ))
                })?;
                PropertyKind::Relation(relation)
            }
        };

        if let PropertyKind::Number(NumberConfig {
            min: Some(min),
            max: Some(max),
            ..
        }) = &kind
        {
            if min > max {
                return Err(Error::InvalidSchema(format!(
                    "number property '{key}' has min {min} greater than max {max}"
                )));
            }
        }

        Ok(Self {
            name: raw.name.unwrap_or_else(|| key.clone()),
            key,
            required: raw.required,
            display_order: raw.display_order,
            kind,
        })
    }
}

fn parse_config<T: DeserializeOwned + Default>(key: &str, config: serde_json::Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config)
        .map_err(|error| Error::InvalidSchema(format!("invalid config for '{key}': {error}")))
}

impl From<PropertyDefinition> for RawPropertyDefinition {
    fn from(definition: PropertyDefinition) -> Self {
        let property_type = definition.kind.property_type();
        let config = match &definition.kind {
            PropertyKind::Text(config) | PropertyKind::LongText(config) => {
                serde_json::to_value(config)
            }
            PropertyKind::Number(config) => serde_json::to_value(config),
            PropertyKind::Select(config) | PropertyKind::MultiSelect(config) => {
                serde_json::to_value(config)
            }
            PropertyKind::File(config) => serde_json::to_value(config),
            PropertyKind::Relation(config) => serde_json::to_value(config),
            PropertyKind::Checkbox
            | PropertyKind::Date
            | PropertyKind::DateTime
            | PropertyKind::Email
            | PropertyKind::Url => Ok(serde_json::Value::Null),
        }
        .unwrap_or(serde_json::Value::Null);

        Self {
            key: definition.key,
            name: Some(definition.name),
            property_type,
            required: definition.required,
            config,
            display_order: definition.display_order,
        }
    }
}
