//! Persistence and schema contracts consumed by the editing engine
//!
//! The engine never talks to a database directly. A [`Repository`] performs
//! the create/update round-trips and a [`SchemaService`] hands out the
//! property map of a table. In-memory implementations back the CLI and the
//! tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{PropertyMap, RecordData, RecordId, RecordSnapshot, TableId};
use crate::util::unix_millis_now;

/// The server rejected a write because the record moved on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSignal {
    /// Server's current full record
    pub current: RecordSnapshot,
}

/// Response to a version-checked update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Saved(RecordSnapshot),
    Conflict(ConflictSignal),
}

/// Trait for record storage operations
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist a new record and return it with its first version
    async fn create_record(&self, table_id: TableId, data: RecordData) -> Result<RecordSnapshot>;

    /// Apply `changes` if the record is still at `expected_version`
    async fn update_record(
        &self,
        id: RecordId,
        changes: RecordData,
        expected_version: u64,
    ) -> Result<UpdateOutcome>;
}

/// Trait for looking up table schemas
#[async_trait]
pub trait SchemaService: Send + Sync {
    async fn property_map(&self, table_id: TableId) -> Result<PropertyMap>;
}

/// A call observed by [`MemoryRepository`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    Create {
        table_id: TableId,
        data: RecordData,
    },
    Update {
        record_id: RecordId,
        changes: RecordData,
        expected_version: u64,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<RecordId, RecordSnapshot>,
    calls: Vec<RepositoryCall>,
    failures: VecDeque<String>,
    in_flight: HashMap<RecordId, usize>,
    max_in_flight: usize,
}

/// In-memory `Repository` with version checks, injectable failures and
/// simulated latency
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
    latency: Duration,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RecordSnapshot>) -> Self {
        let state = MemoryState {
            records: records
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency` before it is answered
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call fail with a save error
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().await.failures.push_back(message.into());
    }

    /// Apply a write from another client, bumping the version.
    pub async fn external_update(&self, id: RecordId, changes: RecordData) -> Result<RecordSnapshot> {
        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        record.data.extend(changes);
        record.version += 1;
        record.last_modified = unix_millis_now();
        tracing::debug!("External write moved record {} to version {}", id, record.version);
        Ok(record.clone())
    }

    pub async fn get(&self, id: RecordId) -> Option<RecordSnapshot> {
        self.state.lock().await.records.get(&id).cloned()
    }

    /// All stored records, oldest id first
    pub async fn records(&self) -> Vec<RecordSnapshot> {
        let mut records: Vec<_> = self.state.lock().await.records.values().cloned().collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub async fn calls(&self) -> Vec<RepositoryCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn update_calls(&self) -> Vec<RepositoryCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, RepositoryCall::Update { .. }))
            .collect()
    }

    /// Highest number of concurrent updates seen for any single record
    pub async fn max_in_flight_per_record(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    async fn take_failure(&self) -> Option<String> {
        self.state.lock().await.failures.pop_front()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_record(&self, table_id: TableId, data: RecordData) -> Result<RecordSnapshot> {
        self.state.lock().await.calls.push(RepositoryCall::Create {
            table_id,
            data: data.clone(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = self.take_failure().await {
            return Err(Error::Save(message));
        }

        let record = RecordSnapshot {
            id: RecordId::new(),
            table_id,
            data,
            version: 1,
            last_modified: unix_millis_now(),
        };
        self.state
            .lock()
            .await
            .records
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        id: RecordId,
        changes: RecordData,
        expected_version: u64,
    ) -> Result<UpdateOutcome> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(RepositoryCall::Update {
                record_id: id,
                changes: changes.clone(),
                expected_version,
            });
            let count = state.in_flight.entry(id).or_insert(0);
            *count += 1;
            let count = *count;
            state.max_in_flight = state.max_in_flight.max(count);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(count) = state.in_flight.get_mut(&id) {
            *count = count.saturating_sub(1);
        }
        if let Some(message) = state.failures.pop_front() {
            return Err(Error::Save(message));
        }

        let record = state.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        if record.version != expected_version {
            return Ok(UpdateOutcome::Conflict(ConflictSignal {
                current: record.clone(),
            }));
        }
        record.data.extend(changes);
        record.version += 1;
        record.last_modified = unix_millis_now();
        Ok(UpdateOutcome::Saved(record.clone()))
    }
}

/// Fixed schemas keyed by table
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaService {
    tables: HashMap<TableId, PropertyMap>,
}

impl MemorySchemaService {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(mut self, table_id: TableId, schema: PropertyMap) -> Self {
        self.tables.insert(table_id, schema);
        self
    }
}

#[async_trait]
impl SchemaService for MemorySchemaService {
    async fn property_map(&self, table_id: TableId) -> Result<PropertyMap> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or_else(|| Error::InvalidSchema(format!("no schema for table {table_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(table_id: TableId) -> RecordSnapshot {
        RecordSnapshot {
            id: RecordId::new(),
            table_id,
            data: RecordData::from([("title".to_string(), json!("Retainer"))]),
            version: 1,
            last_modified: 0,
        }
    }

    #[tokio::test]
    async fn update_checks_expected_version() {
        let table_id = TableId::new();
        let existing = record(table_id);
        let repository = MemoryRepository::with_records([existing.clone()]);
        let changes = RecordData::from([("title".to_string(), json!("Retainer - Q2"))]);

        let outcome = repository
            .update_record(existing.id, changes.clone(), 1)
            .await
            .unwrap();
        let UpdateOutcome::Saved(saved) = outcome else {
            panic!("expected save");
        };
        assert_eq!(saved.version, 2);
        assert_eq!(saved.data["title"], json!("Retainer - Q2"));

        let stale = repository
            .update_record(existing.id, changes, 1)
            .await
            .unwrap();
        assert!(matches!(stale, UpdateOutcome::Conflict(signal) if signal.current.version == 2));
        assert_eq!(repository.update_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn create_assigns_id_and_first_version() {
        let repository = MemoryRepository::new();
        let table_id = TableId::new();
        let created = repository
            .create_record(table_id, RecordData::from([("amount".to_string(), json!(3))]))
            .await
            .unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(repository.get(created.id).await, Some(created));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let table_id = TableId::new();
        let existing = record(table_id);
        let repository = MemoryRepository::with_records([existing.clone()]);
        repository.fail_next("gateway timeout").await;

        let failed = repository
            .update_record(existing.id, RecordData::new(), 1)
            .await;
        assert!(matches!(failed, Err(Error::Save(message)) if message == "gateway timeout"));
        assert!(repository
            .update_record(existing.id, RecordData::new(), 1)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn external_update_bumps_version() {
        let table_id = TableId::new();
        let existing = record(table_id);
        let repository = MemoryRepository::with_records([existing.clone()]);
        let updated = repository
            .external_update(
                existing.id,
                RecordData::from([("title".to_string(), json!("Changed elsewhere"))]),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn schema_service_rejects_unknown_table() {
        let service = MemorySchemaService::new();
        assert!(matches!(
            service.property_map(TableId::new()).await,
            Err(Error::InvalidSchema(_))
        ));
    }
}
