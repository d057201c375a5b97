//! Engine configuration.
//!
//! Provides `EngineConfig`, the timing and resolution policy shared by every
//! editing session. Values come from JSON and may be overridden from the
//! environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

const DEFAULT_DRAFT_SETTLE_MS: u64 = 800;
const DEFAULT_FIELD_SETTLE_MS: u64 = 500;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const MAX_SETTLE_MS: u64 = 60_000;

/// Autosave and conflict policy for an editing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Settle window before a complete draft is created
    pub draft_settle_ms: u64,
    /// Settle window before an existing record's field is updated
    pub field_settle_ms: u64,
    /// Fire a cell's pending write as soon as the cell loses focus
    pub flush_on_blur: bool,
    /// Automatic `keep_local` retries after a resubmission conflicts again
    pub conflict_auto_retries: u32,
    /// Buffer size of the engine event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            draft_settle_ms: DEFAULT_DRAFT_SETTLE_MS,
            field_settle_ms: DEFAULT_FIELD_SETTLE_MS,
            flush_on_blur: false,
            conflict_auto_retries: 0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `DOCKET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `DOCKET_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        self.with_overrides(|name| values.get(name).cloned())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = parse_override::<u64>(&lookup, "DOCKET_DRAFT_SETTLE_MS")? {
            self.draft_settle_ms = value;
        }
        if let Some(value) = parse_override::<u64>(&lookup, "DOCKET_FIELD_SETTLE_MS")? {
            self.field_settle_ms = value;
        }
        if let Some(value) = parse_override::<bool>(&lookup, "DOCKET_FLUSH_ON_BLUR")? {
            self.flush_on_blur = value;
        }
        if let Some(value) = parse_override::<u32>(&lookup, "DOCKET_CONFLICT_AUTO_RETRIES")? {
            self.conflict_auto_retries = value;
        }
        if let Some(value) = parse_override::<usize>(&lookup, "DOCKET_EVENT_CAPACITY")? {
            self.event_capacity = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settle windows outside `1..=60000` ms and an empty event buffer.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("draft_settle_ms", self.draft_settle_ms),
            ("field_settle_ms", self.field_settle_ms),
        ] {
            if !(1..=MAX_SETTLE_MS).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be in [1, {MAX_SETTLE_MS}], got {value}"
                )));
            }
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn draft_settle(&self) -> Duration {
        Duration::from_millis(self.draft_settle_ms)
    }

    #[must_use]
    pub const fn field_settle(&self) -> Duration {
        Duration::from_millis(self.field_settle_ms)
    }
}

// ---------------------------------------------------------------------------
// Private
// ---------------------------------------------------------------------------

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw}")))
}
