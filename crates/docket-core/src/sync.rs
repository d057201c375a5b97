//! Optimistic local mutation with version-checked reconciliation
//!
//! Each loaded record keeps two layers: the confirmed snapshot the server
//! last acknowledged, and an unconfirmed overlay of local edits not yet
//! acknowledged. Views read the merge of both. A successful write folds the
//! acknowledged fields into a new confirmed snapshot; a save error leaves
//! the overlay untouched so nothing typed is lost; a version conflict raises
//! a [`ConflictCase`] and keeps both sides until the operator decides.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{
    ConflictCase, ConflictChoice, FieldValue, RecordData, RecordId, RecordSnapshot, TableId,
};
use crate::repository::UpdateOutcome;
use crate::util::unix_millis_now;

/// Sync state of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local view equals the confirmed snapshot
    Synced,
    /// Unconfirmed local edits exist
    Pending,
    /// Last write failed; unconfirmed edits are retained for a retry
    Failed(String),
    /// A version conflict awaits resolution
    Conflicted,
}

/// A loaded record: confirmed snapshot plus unconfirmed overlay
#[derive(Debug, Clone)]
pub struct LocalRecord {
    confirmed: RecordSnapshot,
    unconfirmed: RecordData,
    status: SyncStatus,
    /// Keys of the last failed write still waiting in the overlay
    failed_keys: BTreeSet<String>,
    failure: Option<String>,
    /// Server copy captured when the conflict was raised
    conflict_server: Option<RecordSnapshot>,
    /// Resubmissions made since the last operator decision
    resolution_attempts: u32,
}

impl LocalRecord {
    fn new(confirmed: RecordSnapshot) -> Self {
        Self {
            confirmed,
            unconfirmed: RecordData::new(),
            status: SyncStatus::Synced,
            failed_keys: BTreeSet::new(),
            failure: None,
            conflict_server: None,
            resolution_attempts: 0,
        }
    }

    /// Last server-acknowledged state
    pub const fn confirmed(&self) -> &RecordSnapshot {
        &self.confirmed
    }

    /// Local edits not yet acknowledged
    pub const fn unconfirmed(&self) -> &RecordData {
        &self.unconfirmed
    }

    pub const fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn is_optimistic(&self) -> bool {
        !self.unconfirmed.is_empty()
    }

    /// What the user sees: confirmed data with unconfirmed edits on top
    pub fn view(&self) -> RecordData {
        let mut data = self.confirmed.data.clone();
        data.extend(
            self.unconfirmed
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        data
    }

    /// Failed stays until every key of the failed write is confirmed or
    /// dropped from the overlay.
    fn refresh_status(&mut self) {
        self.failed_keys
            .retain(|key| self.unconfirmed.contains_key(key));
        if self.failed_keys.is_empty() {
            self.failure = None;
        }
        self.status = match &self.failure {
            _ if self.unconfirmed.is_empty() => SyncStatus::Synced,
            Some(message) => SyncStatus::Failed(message.clone()),
            None => SyncStatus::Pending,
        };
    }

    fn fail(&mut self, keys: impl IntoIterator<Item = String>, message: String) {
        self.failed_keys.extend(keys);
        self.failure = Some(message);
        self.refresh_status();
    }

    /// Adopt `snapshot` as confirmed and drop overlay entries it satisfies.
    fn confirm(&mut self, snapshot: RecordSnapshot) {
        self.unconfirmed
            .retain(|key, value| snapshot.data.get(key) != Some(value));
        self.confirmed = snapshot;
        self.refresh_status();
    }
}

/// A write ready for the repository, stamped with the version it assumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingWrite {
    pub record_id: RecordId,
    pub changes: RecordData,
    pub expected_version: u64,
}

/// How a repository response was folded into local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Server accepted the write; the snapshot now has `version`
    Committed { version: u64 },
    /// Response was already applied; nothing changed
    Duplicate,
    /// Write was rejected as stale; a conflict now awaits resolution
    Conflict(ConflictCase),
    /// Resubmission conflicted again and is retried automatically
    Retry(OutgoingWrite),
    /// Network or server failure; the optimistic change is retained
    Failed(String),
}

/// Owns every loaded record of one table view and its conflicts
#[derive(Debug)]
pub struct OptimisticSyncEngine {
    table_id: TableId,
    records: HashMap<RecordId, LocalRecord>,
    order: Vec<RecordId>,
    conflicts: VecDeque<RecordId>,
    cases: HashMap<RecordId, ConflictCase>,
    auto_retries: u32,
}

impl OptimisticSyncEngine {
    pub fn new(
        table_id: TableId,
        snapshots: impl IntoIterator<Item = RecordSnapshot>,
        auto_retries: u32,
    ) -> Self {
        let mut engine = Self {
            table_id,
            records: HashMap::new(),
            order: Vec::new(),
            conflicts: VecDeque::new(),
            cases: HashMap::new(),
            auto_retries,
        };
        for snapshot in snapshots {
            engine.insert(snapshot);
        }
        engine
    }

    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Track a record, replacing any previous state for its id.
    pub fn insert(&mut self, snapshot: RecordSnapshot) {
        let id = snapshot.id;
        if self.records.insert(id, LocalRecord::new(snapshot)).is_none() {
            self.order.push(id);
        }
    }

    /// Record ids in load order
    pub fn record_ids(&self) -> &[RecordId] {
        &self.order
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn get(&self, id: RecordId) -> Option<&LocalRecord> {
        self.records.get(&id)
    }

    fn get_mut(&mut self, id: RecordId) -> Result<&mut LocalRecord> {
        self.records.get_mut(&id).ok_or(Error::RecordNotFound(id))
    }

    /// Merged local view of a record
    pub fn view(&self, id: RecordId) -> Option<RecordData> {
        self.records.get(&id).map(LocalRecord::view)
    }

    /// Apply `changes` locally before the server confirms them.
    ///
    /// Returns the version the eventual write will be checked against.
    pub fn apply_optimistic(&mut self, id: RecordId, changes: RecordData) -> Result<u64> {
        let record = self.get_mut(id)?;
        record.unconfirmed.extend(changes);
        if record.status != SyncStatus::Conflicted {
            record.refresh_status();
        }
        Ok(record.confirmed.version)
    }

    /// Drop an unsent local edit of `key`, returning the dropped value.
    pub fn discard_unconfirmed(&mut self, id: RecordId, key: &str) -> Result<Option<FieldValue>> {
        let record = self.get_mut(id)?;
        let dropped = record.unconfirmed.remove(key);
        if dropped.is_some() && record.status != SyncStatus::Conflicted {
            record.refresh_status();
        }
        Ok(dropped)
    }

    /// Stamp `changes` with the currently confirmed version.
    pub fn outgoing(&self, id: RecordId, changes: RecordData) -> Result<OutgoingWrite> {
        let record = self.records.get(&id).ok_or(Error::RecordNotFound(id))?;
        Ok(OutgoingWrite {
            record_id: id,
            changes,
            expected_version: record.confirmed.version,
        })
    }

    /// Fold a repository response for `write` into local state.
    pub fn reconcile(
        &mut self,
        write: &OutgoingWrite,
        response: Result<UpdateOutcome>,
    ) -> Result<Reconciled> {
        let auto_retries = self.auto_retries;
        let record = self.get_mut(write.record_id)?;

        match response {
            Ok(UpdateOutcome::Saved(snapshot)) => {
                if snapshot.version <= record.confirmed.version {
                    return Ok(Reconciled::Duplicate);
                }
                if snapshot.version != write.expected_version + 1 {
                    tracing::warn!(
                        "Record {} jumped from version {} to {}",
                        write.record_id,
                        write.expected_version,
                        snapshot.version
                    );
                }
                let version = snapshot.version;
                record.confirm(snapshot);
                record.resolution_attempts = 0;
                tracing::debug!("Record {} confirmed at version {}", write.record_id, version);
                Ok(Reconciled::Committed { version })
            }
            Ok(UpdateOutcome::Conflict(signal)) => {
                let server = signal.current;
                if record.resolution_attempts > 0 && record.resolution_attempts <= auto_retries {
                    record.resolution_attempts += 1;
                    let local = record.view();
                    record.confirmed = server;
                    record.unconfirmed = diff(&local, &record.confirmed.data);
                    tracing::warn!(
                        "Resubmission for record {} conflicted again; retrying against version {}",
                        write.record_id,
                        record.confirmed.version
                    );
                    return Ok(Reconciled::Retry(OutgoingWrite {
                        record_id: write.record_id,
                        changes: record.unconfirmed.clone(),
                        expected_version: record.confirmed.version,
                    }));
                }
                self.raise_conflict(write, server)
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!("Failed to save record {}: {}", write.record_id, message);
                record.fail(write.changes.keys().cloned(), message.clone());
                Ok(Reconciled::Failed(message))
            }
        }
    }

    fn raise_conflict(&mut self, write: &OutgoingWrite, server: RecordSnapshot) -> Result<Reconciled> {
        let id = write.record_id;
        let record = self.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        record.status = SyncStatus::Conflicted;
        record.resolution_attempts = 0;

        if let Some(case) = self.cases.get_mut(&id) {
            case.server_data = server.data.clone();
            case.server_version = server.version;
            record.conflict_server = Some(server);
            return Ok(Reconciled::Duplicate);
        }

        let case = ConflictCase {
            record_id: id,
            local_data: record.view(),
            server_data: server.data.clone(),
            local_version: write.expected_version,
            server_version: server.version,
            raised_at: unix_millis_now(),
        };
        record.conflict_server = Some(server);
        tracing::warn!(
            "Version conflict on record {}: local {} vs server {}",
            id,
            case.local_version,
            case.server_version
        );
        self.cases.insert(id, case.clone());
        self.conflicts.push_back(id);
        Ok(Reconciled::Conflict(case))
    }

    /// Oldest unresolved conflict
    pub fn current_conflict(&self) -> Option<&ConflictCase> {
        self.conflicts.front().and_then(|id| self.cases.get(id))
    }

    pub fn conflict(&self, id: RecordId) -> Option<&ConflictCase> {
        self.cases.get(&id)
    }

    pub fn conflict_count(&self) -> usize {
        self.cases.len()
    }

    /// Apply the operator's decision for the conflict on `id`.
    ///
    /// Returns the write to resubmit for `keep_local` and `merge`, or `None`
    /// when nothing needs sending.
    pub fn resolve_conflict(
        &mut self,
        id: RecordId,
        choice: ConflictChoice,
        merged: Option<RecordData>,
    ) -> Result<Option<OutgoingWrite>> {
        if !self.cases.contains_key(&id) {
            return Err(Error::NoConflict(id));
        }
        if choice == ConflictChoice::Merge && merged.is_none() {
            return Err(Error::MergePayloadRequired);
        }

        let record = self.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        let server = record.conflict_server.take().ok_or_else(|| {
            Error::IntegrityViolation(format!("conflict on {id} lost its server copy"))
        })?;
        let local = record.view();

        record.confirmed = server;
        record.unconfirmed = match (choice, merged) {
            (ConflictChoice::UseServer, _) => RecordData::new(),
            (ConflictChoice::KeepLocal, _) => diff(&local, &record.confirmed.data),
            (ConflictChoice::Merge, Some(merged)) => diff(&merged, &record.confirmed.data),
            (ConflictChoice::Merge, None) => return Err(Error::MergePayloadRequired),
        };
        record.failed_keys.clear();
        record.refresh_status();

        let resubmit = if record.unconfirmed.is_empty() {
            None
        } else {
            record.resolution_attempts = 1;
            Some(OutgoingWrite {
                record_id: id,
                changes: record.unconfirmed.clone(),
                expected_version: record.confirmed.version,
            })
        };

        self.cases.remove(&id);
        self.conflicts.retain(|queued| *queued != id);
        tracing::info!("Resolved conflict on record {} with {}", id, choice.as_str());
        Ok(resubmit)
    }

    /// Unconfirmed changes to resend after a failed save.
    ///
    /// Returns `None` when nothing is unconfirmed or the record is waiting
    /// on a conflict decision.
    pub fn retry_changes(&mut self, id: RecordId) -> Result<Option<RecordData>> {
        let record = self.get_mut(id)?;
        if record.status == SyncStatus::Conflicted {
            return Ok(None);
        }
        record.refresh_status();
        Ok((!record.unconfirmed.is_empty()).then(|| record.unconfirmed.clone()))
    }

    pub fn status(&self, id: RecordId) -> Option<&SyncStatus> {
        self.records.get(&id).map(LocalRecord::status)
    }
}

/// Keys of `local` whose value differs from `base`
fn diff(local: &RecordData, base: &RecordData) -> RecordData {
    local
        .iter()
        .filter(|(key, value)| base.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ConflictSignal;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(pairs: &[(&str, serde_json::Value)]) -> RecordData {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    fn snapshot(id: RecordId, table_id: TableId, version: u64, values: RecordData) -> RecordSnapshot {
        RecordSnapshot {
            id,
            table_id,
            data: values,
            version,
            last_modified: 0,
        }
    }

    fn engine_with_record() -> (OptimisticSyncEngine, RecordId, TableId) {
        let table_id = TableId::new();
        let id = RecordId::new();
        let engine = OptimisticSyncEngine::new(
            table_id,
            [snapshot(
                id,
                table_id,
                3,
                data(&[("title", json!("Retainer")), ("amount", json!(100))]),
            )],
            0,
        );
        (engine, id, table_id)
    }

    #[test]
    fn optimistic_change_is_visible_before_confirmation() {
        let (mut engine, id, _) = engine_with_record();
        let expected = engine
            .apply_optimistic(id, data(&[("amount", json!(150))]))
            .unwrap();
        assert_eq!(expected, 3);

        let record = engine.get(id).unwrap();
        assert_eq!(record.view()["amount"], json!(150));
        assert_eq!(record.confirmed().data["amount"], json!(100));
        assert!(record.is_optimistic());
        assert_eq!(record.status(), &SyncStatus::Pending);
    }

    #[test]
    fn reconcile_commits_and_is_idempotent() {
        let (mut engine, id, table_id) = engine_with_record();
        let changes = data(&[("amount", json!(150))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes).unwrap();

        let server = snapshot(
            id,
            table_id,
            4,
            data(&[("title", json!("Retainer")), ("amount", json!(150))]),
        );
        let first = engine
            .reconcile(&write, Ok(UpdateOutcome::Saved(server.clone())))
            .unwrap();
        assert_eq!(first, Reconciled::Committed { version: 4 });

        let record = engine.get(id).unwrap();
        assert_eq!(record.confirmed(), &server);
        assert!(!record.is_optimistic());
        assert_eq!(record.status(), &SyncStatus::Synced);

        let second = engine
            .reconcile(&write, Ok(UpdateOutcome::Saved(server.clone())))
            .unwrap();
        assert_eq!(second, Reconciled::Duplicate);
        assert_eq!(engine.get(id).unwrap().confirmed(), &server);
    }

    #[test]
    fn edits_made_during_flight_stay_unconfirmed() {
        let (mut engine, id, table_id) = engine_with_record();
        engine
            .apply_optimistic(id, data(&[("amount", json!(150))]))
            .unwrap();
        let write = engine.outgoing(id, data(&[("amount", json!(150))])).unwrap();
        engine
            .apply_optimistic(id, data(&[("amount", json!(175))]))
            .unwrap();

        let server = snapshot(
            id,
            table_id,
            4,
            data(&[("title", json!("Retainer")), ("amount", json!(150))]),
        );
        engine
            .reconcile(&write, Ok(UpdateOutcome::Saved(server)))
            .unwrap();
        let record = engine.get(id).unwrap();
        assert_eq!(record.unconfirmed(), &data(&[("amount", json!(175))]));
        assert_eq!(record.status(), &SyncStatus::Pending);
    }

    #[test]
    fn save_error_keeps_optimistic_change() {
        let (mut engine, id, table_id) = engine_with_record();
        let changes = data(&[("title", json!("Retainer (amended)"))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes.clone()).unwrap();

        let outcome = engine
            .reconcile(&write, Err(Error::Save("connection reset".into())))
            .unwrap();
        assert!(matches!(outcome, Reconciled::Failed(_)));
        let record = engine.get(id).unwrap();
        assert_eq!(record.view()["title"], json!("Retainer (amended)"));
        assert!(matches!(record.status(), SyncStatus::Failed(_)));

        assert_eq!(engine.retry_changes(id).unwrap(), Some(changes.clone()));
        assert!(matches!(engine.status(id), Some(SyncStatus::Failed(_))));

        let retried = engine.outgoing(id, changes).unwrap();
        let server = snapshot(
            id,
            table_id,
            4,
            data(&[("title", json!("Retainer (amended)")), ("amount", json!(100))]),
        );
        engine
            .reconcile(&retried, Ok(UpdateOutcome::Saved(server)))
            .unwrap();
        assert_eq!(engine.status(id), Some(&SyncStatus::Synced));
    }

    #[test]
    fn failure_survives_a_later_save_of_another_field() {
        let (mut engine, id, table_id) = engine_with_record();
        let title = data(&[("title", json!("Filing"))]);
        engine.apply_optimistic(id, title.clone()).unwrap();
        let failed = engine.outgoing(id, title).unwrap();
        engine
            .reconcile(&failed, Err(Error::Save("gateway timeout".into())))
            .unwrap();

        let amount = data(&[("amount", json!(99))]);
        engine.apply_optimistic(id, amount.clone()).unwrap();
        let write = engine.outgoing(id, amount).unwrap();
        let server = snapshot(
            id,
            table_id,
            4,
            data(&[("title", json!("Retainer")), ("amount", json!(99))]),
        );
        engine
            .reconcile(&write, Ok(UpdateOutcome::Saved(server)))
            .unwrap();

        assert_eq!(
            engine.status(id),
            Some(&SyncStatus::Failed("Save failed: gateway timeout".to_string()))
        );
        assert_eq!(
            engine.retry_changes(id).unwrap(),
            Some(data(&[("title", json!("Filing"))]))
        );
    }

    #[test]
    fn discarding_the_failed_key_clears_the_failure() {
        let (mut engine, id, _) = engine_with_record();
        let amount = data(&[("amount", json!(12))]);
        engine.apply_optimistic(id, amount.clone()).unwrap();
        let write = engine.outgoing(id, amount).unwrap();
        engine
            .reconcile(&write, Err(Error::Save("offline".into())))
            .unwrap();

        assert_eq!(
            engine.discard_unconfirmed(id, "amount").unwrap(),
            Some(json!(12))
        );
        assert_eq!(engine.view(id).unwrap()["amount"], json!(100));
        assert_eq!(engine.status(id), Some(&SyncStatus::Synced));
        assert_eq!(engine.retry_changes(id).unwrap(), None);
    }

    #[test]
    fn stale_write_raises_single_conflict_and_use_server_adopts_it() {
        let (mut engine, id, table_id) = engine_with_record();
        let changes = data(&[("amount", json!(150))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes).unwrap();

        let server = snapshot(
            id,
            table_id,
            5,
            data(&[("title", json!("Retainer - Q2")), ("amount", json!(100))]),
        );
        let outcome = engine
            .reconcile(
                &write,
                Ok(UpdateOutcome::Conflict(ConflictSignal {
                    current: server.clone(),
                })),
            )
            .unwrap();
        let Reconciled::Conflict(case) = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(case.local_data["amount"], json!(150));
        assert_eq!(case.local_data["title"], json!("Retainer"));
        assert_eq!(case.server_data, server.data);
        assert_eq!((case.local_version, case.server_version), (3, 5));
        assert_eq!(engine.conflict_count(), 1);
        assert_eq!(engine.current_conflict(), Some(&case));

        let resubmit = engine
            .resolve_conflict(id, ConflictChoice::UseServer, None)
            .unwrap();
        assert_eq!(resubmit, None);
        assert_eq!(engine.get(id).unwrap().confirmed().data, case.server_data);
        assert_eq!(engine.view(id).unwrap(), case.server_data);
        assert_eq!(engine.current_conflict(), None);
        assert_eq!(engine.status(id), Some(&SyncStatus::Synced));
    }

    #[test]
    fn keep_local_resubmits_against_server_version() {
        let (mut engine, id, table_id) = engine_with_record();
        let changes = data(&[("amount", json!(150))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes).unwrap();
        let server = snapshot(
            id,
            table_id,
            5,
            data(&[("title", json!("Retainer")), ("amount", json!(90))]),
        );
        engine
            .reconcile(
                &write,
                Ok(UpdateOutcome::Conflict(ConflictSignal { current: server })),
            )
            .unwrap();

        let resubmit = engine
            .resolve_conflict(id, ConflictChoice::KeepLocal, None)
            .unwrap()
            .unwrap();
        assert_eq!(resubmit.expected_version, 5);
        assert_eq!(resubmit.changes, data(&[("amount", json!(150))]));
        assert_eq!(engine.view(id).unwrap()["amount"], json!(150));
    }

    #[test]
    fn merge_requires_payload_and_sends_difference() {
        let (mut engine, id, table_id) = engine_with_record();
        let changes = data(&[("amount", json!(150))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes).unwrap();
        let server = snapshot(
            id,
            table_id,
            4,
            data(&[("title", json!("Retainer - Q2")), ("amount", json!(100))]),
        );
        engine
            .reconcile(
                &write,
                Ok(UpdateOutcome::Conflict(ConflictSignal { current: server })),
            )
            .unwrap();

        assert!(matches!(
            engine.resolve_conflict(id, ConflictChoice::Merge, None),
            Err(Error::MergePayloadRequired)
        ));

        let merged = data(&[("title", json!("Retainer - Q2")), ("amount", json!(150))]);
        let resubmit = engine
            .resolve_conflict(id, ConflictChoice::Merge, Some(merged))
            .unwrap()
            .unwrap();
        assert_eq!(resubmit.changes, data(&[("amount", json!(150))]));
        assert_eq!(resubmit.expected_version, 4);
    }

    #[test]
    fn resolving_without_conflict_fails() {
        let (mut engine, id, _) = engine_with_record();
        assert!(matches!(
            engine.resolve_conflict(id, ConflictChoice::UseServer, None),
            Err(Error::NoConflict(_))
        ));
    }

    #[test]
    fn repeated_conflict_after_keep_local_needs_operator_by_default() {
        let (mut engine, id, table_id) = engine_with_record();
        let changes = data(&[("amount", json!(150))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes).unwrap();
        let conflict = |version| {
            Ok(UpdateOutcome::Conflict(ConflictSignal {
                current: snapshot(id, table_id, version, data(&[("amount", json!(90))])),
            }))
        };
        engine.reconcile(&write, conflict(5)).unwrap();
        let resubmit = engine
            .resolve_conflict(id, ConflictChoice::KeepLocal, None)
            .unwrap()
            .unwrap();

        let outcome = engine.reconcile(&resubmit, conflict(6)).unwrap();
        assert!(matches!(outcome, Reconciled::Conflict(_)));
        assert_eq!(engine.conflict_count(), 1);
    }

    #[test]
    fn auto_retries_bound_keep_local_resubmissions() {
        let table_id = TableId::new();
        let id = RecordId::new();
        let mut engine = OptimisticSyncEngine::new(
            table_id,
            [snapshot(id, table_id, 1, data(&[("amount", json!(1))]))],
            1,
        );
        let conflict = |version| {
            Ok(UpdateOutcome::Conflict(ConflictSignal {
                current: snapshot(id, table_id, version, data(&[("amount", json!(0))])),
            }))
        };

        let changes = data(&[("amount", json!(2))]);
        engine.apply_optimistic(id, changes.clone()).unwrap();
        let write = engine.outgoing(id, changes).unwrap();
        engine.reconcile(&write, conflict(2)).unwrap();
        let resubmit = engine
            .resolve_conflict(id, ConflictChoice::KeepLocal, None)
            .unwrap()
            .unwrap();

        let Reconciled::Retry(retry) = engine.reconcile(&resubmit, conflict(3)).unwrap() else {
            panic!("first repeat conflict should retry automatically");
        };
        assert_eq!(retry.expected_version, 3);
        assert_eq!(retry.changes, data(&[("amount", json!(2))]));

        let outcome = engine.reconcile(&retry, conflict(4)).unwrap();
        assert!(matches!(outcome, Reconciled::Conflict(_)));
    }
}
