//! Editing session for one table view
//!
//! [`EditingSession`] owns the active cell, the draft row, the autosave
//! queue and the loaded records. Every user-facing operation is a synchronous
//! method; settle timers and repository calls run as spawned tokio tasks and
//! report back over a channel drained by [`EditingSession::process_next`].
//! State only changes inside those methods, so one task driving the session
//! sees a consistent ordering without locks.
//!
//! Methods that schedule work spawn tasks and must run inside a tokio
//! runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::autosave::{AutosaveScheduler, FireDecision, PendingWrite, WriteTarget};
use crate::config::EngineConfig;
use crate::draft::DraftRecordLedger;
use crate::editing::{ActiveCell, Direction, EditSessionController, FocusChange, GridLayout};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::models::{
    ConflictCase, ConflictChoice, DraftRecord, FieldValue, PropertyMap, RecordData, RecordId,
    RecordSnapshot, RowRef, TableId,
};
use crate::repository::{Repository, SchemaService, UpdateOutcome};
use crate::sync::{OptimisticSyncEngine, OutgoingWrite, Reconciled, SyncStatus};
use crate::validation::{is_record_complete, validate_field, FieldValidation};

/// Autosave indicator for one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    /// Edits are waiting for their settle window or for the row to free up
    Pending,
    Saving,
    /// Last save failed; the edited values are still shown
    Failed(String),
    Conflicted,
}

#[derive(Debug)]
enum SessionMessage {
    TimerFired {
        target: WriteTarget,
        generation: u64,
    },
    CreateFinished {
        result: Result<RecordSnapshot>,
    },
    UpdateFinished {
        write: OutgoingWrite,
        result: Result<UpdateOutcome>,
    },
}

/// Explicit owner of all editing state for one table view
pub struct EditingSession {
    table_id: TableId,
    schema: PropertyMap,
    repository: Arc<dyn Repository>,
    controller: EditSessionController,
    ledger: DraftRecordLedger,
    autosave: AutosaveScheduler,
    sync: OptimisticSyncEngine,
    events: EventBus,
    visible_rows: Option<Vec<RowRef>>,
    invalid_edits: HashMap<(RecordId, String), Vec<String>>,
    draft_error: Option<String>,
    tx: mpsc::UnboundedSender<SessionMessage>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
    outstanding: usize,
    config: EngineConfig,
}

impl EditingSession {
    pub fn new(
        table_id: TableId,
        schema: PropertyMap,
        records: impl IntoIterator<Item = RecordSnapshot>,
        repository: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            table_id,
            schema,
            repository,
            controller: EditSessionController::new(),
            ledger: DraftRecordLedger::new(),
            autosave: AutosaveScheduler::new(&config),
            sync: OptimisticSyncEngine::new(table_id, records, config.conflict_auto_retries),
            events: EventBus::new(config.event_capacity),
            visible_rows: None,
            invalid_edits: HashMap::new(),
            draft_error: None,
            tx,
            rx,
            outstanding: 0,
            config,
        }
    }

    /// Load the table schema and start a session over `records`.
    pub async fn open(
        table_id: TableId,
        schemas: &dyn SchemaService,
        records: Vec<RecordSnapshot>,
        repository: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let schema = schemas.property_map(table_id).await?;
        if schema.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "table {table_id} has no properties"
            )));
        }
        tracing::info!(
            "Opened editing session for table {} ({} properties, {} records)",
            table_id,
            schema.len(),
            records.len()
        );
        Ok(Self::new(table_id, schema, records, repository, config))
    }

    pub const fn table_id(&self) -> TableId {
        self.table_id
    }

    pub const fn schema(&self) -> &PropertyMap {
        &self.schema
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn active_cell(&self) -> Option<&ActiveCell> {
        self.controller.active()
    }

    pub const fn draft(&self) -> Option<&DraftRecord> {
        self.ledger.draft()
    }

    /// Loaded records in load order
    pub fn record_ids(&self) -> &[RecordId] {
        self.sync.record_ids()
    }

    /// What the user sees for a record, unconfirmed edits included
    pub fn record(&self, id: RecordId) -> Option<RecordData> {
        self.sync.view(id)
    }

    /// Last server-acknowledged state of a record
    pub fn confirmed(&self, id: RecordId) -> Option<&RecordSnapshot> {
        self.sync.get(id).map(|record| record.confirmed())
    }

    pub fn sync_status(&self, id: RecordId) -> Option<&SyncStatus> {
        self.sync.status(id)
    }

    /// Oldest conflict waiting for a decision
    pub fn current_conflict(&self) -> Option<&ConflictCase> {
        self.sync.current_conflict()
    }

    pub fn conflict(&self, id: RecordId) -> Option<&ConflictCase> {
        self.sync.conflict(id)
    }

    /// Validation errors of the last edit to a record cell that was not sent
    pub fn invalid_edit(&self, id: RecordId, property_key: &str) -> Option<&[String]> {
        self.invalid_edits
            .get(&(id, property_key.to_string()))
            .map(Vec::as_slice)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Row order as filtered and sorted by the presentation layer.
    ///
    /// Rows that do not exist are ignored. An open draft row not listed is
    /// shown first.
    pub fn set_visible_rows(&mut self, rows: Vec<RowRef>) {
        self.visible_rows = Some(rows);
        let grid = self.grid();
        let hidden = self
            .controller
            .active()
            .is_some_and(|cell| !grid.contains(cell));
        if hidden {
            if let Some(cell) = self.controller.blur() {
                self.on_blur(cell);
            }
        }
    }

    /// Navigable grid built from the visible rows and the schema columns
    pub fn grid(&self) -> GridLayout {
        let mut rows: Vec<RowRef> = match &self.visible_rows {
            Some(rows) => rows
                .iter()
                .copied()
                .filter(|row| self.row_exists(*row))
                .collect(),
            None => self
                .sync
                .record_ids()
                .iter()
                .copied()
                .map(RowRef::Record)
                .collect(),
        };
        if self.ledger.is_open() && !rows.contains(&RowRef::Draft) {
            rows.insert(0, RowRef::Draft);
        }
        GridLayout::from_schema(&self.schema, rows)
    }

    fn row_exists(&self, row: RowRef) -> bool {
        match row {
            RowRef::Draft => self.ledger.is_open(),
            RowRef::Record(id) => self.sync.contains(id),
        }
    }

    pub fn focus(&mut self, row: RowRef, property_key: impl Into<String>) -> Result<()> {
        let grid = self.grid();
        if let Some(change) = self
            .controller
            .focus(ActiveCell::new(row, property_key), &grid)?
        {
            self.apply_focus_change(change);
        }
        Ok(())
    }

    pub fn blur(&mut self) -> Option<ActiveCell> {
        let cell = self.controller.blur()?;
        self.on_blur(cell.clone());
        Some(cell)
    }

    /// Move focus; returns the newly focused cell, or `None` at the grid edge.
    pub fn navigate(&mut self, direction: Direction) -> Result<Option<ActiveCell>> {
        let grid = self.grid();
        let Some(change) = self.controller.navigate(direction, &grid)? else {
            return Ok(None);
        };
        let focused = change.focused.clone();
        self.events.emit(EngineEvent::Navigate { direction });
        self.apply_focus_change(change);
        Ok(Some(focused))
    }

    fn apply_focus_change(&mut self, change: FocusChange) {
        if let Some(blurred) = change.blurred {
            self.on_blur(blurred);
        }
        self.events.emit(EngineEvent::Focus {
            row: change.focused.row,
            property_key: change.focused.property_key,
        });
    }

    fn on_blur(&mut self, cell: ActiveCell) {
        if self.config.flush_on_blur {
            let target = match cell.row {
                RowRef::Draft => WriteTarget::DraftCreate,
                RowRef::Record(id) => WriteTarget::field(id, cell.property_key.clone()),
            };
            let decision = self.autosave.fire_now(&target);
            self.handle_decision(decision);
        }
        self.events.emit(EngineEvent::Blur {
            row: cell.row,
            property_key: cell.property_key,
        });
    }

    /// Escape: discard an empty draft, otherwise leave the active cell.
    ///
    /// Returns `false` when an open draft holds data and was kept.
    pub fn cancel(&mut self) -> Result<bool> {
        if self.ledger.is_open() {
            return self.cancel_draft();
        }
        self.blur();
        self.events.emit(EngineEvent::Cancel);
        Ok(true)
    }

    /// Open the draft row and focus its first property.
    pub fn start_draft(&mut self) -> Result<()> {
        let first_key = self.ledger.start(&self.schema)?;
        self.draft_error = None;
        self.events.emit(EngineEvent::DraftStarted);
        if let Some(key) = first_key {
            self.focus(RowRef::Draft, key)?;
        }
        Ok(())
    }

    /// Discard the draft if every field is empty.
    pub fn cancel_draft(&mut self) -> Result<bool> {
        if !self.ledger.cancel()? {
            return Ok(false);
        }
        self.discard_draft_row();
        self.events.emit(EngineEvent::Cancel);
        Ok(true)
    }

    /// Drop the draft row whatever it holds, e.g. when focus leaves it.
    pub fn hide_draft(&mut self) -> bool {
        if self.ledger.hide().is_none() {
            return false;
        }
        self.discard_draft_row();
        true
    }

    fn discard_draft_row(&mut self) {
        let dropped = self.autosave.cancel_row(RowRef::Draft);
        if dropped > 0 {
            tracing::debug!("Dropped {} pending write(s) of discarded draft", dropped);
        }
        if let Some(cell) = self.controller.release_row(RowRef::Draft) {
            self.events.emit(EngineEvent::Blur {
                row: cell.row,
                property_key: cell.property_key,
            });
        }
        self.draft_error = None;
        self.events.emit(EngineEvent::DraftDiscarded);
    }

    /// Record a value typed into a cell.
    ///
    /// Valid values are applied locally at once and scheduled for saving.
    /// Invalid values on existing records are kept as inline errors and
    /// never sent. They supersede any earlier value still waiting to be
    /// sent for the same cell.
    pub fn change(
        &mut self,
        row: RowRef,
        property_key: &str,
        value: FieldValue,
    ) -> Result<FieldValidation> {
        if !self.schema.contains_key(property_key) {
            return Err(Error::UnknownProperty(property_key.to_string()));
        }
        let validation = match row {
            RowRef::Draft => self.change_draft(property_key, value.clone())?,
            RowRef::Record(id) => self.change_record(id, property_key, value.clone())?,
        };
        self.events.emit(EngineEvent::Change {
            row,
            property_key: property_key.to_string(),
            value,
        });
        Ok(validation)
    }

    fn change_draft(&mut self, key: &str, value: FieldValue) -> Result<FieldValidation> {
        let outcome = self.ledger.set_field(key, value, &self.schema)?;
        if self.ledger.is_submitting() {
            tracing::debug!("Draft create in flight; keeping {} for a follow-up", key);
        } else if outcome.ready {
            if let Some(payload) = self.ledger.payload() {
                let write = self
                    .autosave
                    .schedule(WriteTarget::DraftCreate, payload, Instant::now());
                self.arm(&write);
            }
        } else if self.autosave.cancel(&WriteTarget::DraftCreate).is_some() {
            tracing::debug!("Draft is no longer ready; create withdrawn");
        }
        Ok(outcome.validation)
    }

    fn change_record(
        &mut self,
        id: RecordId,
        key: &str,
        value: FieldValue,
    ) -> Result<FieldValidation> {
        if !self.sync.contains(id) {
            return Err(Error::RecordNotFound(id));
        }
        let definition = self
            .schema
            .get(key)
            .ok_or_else(|| Error::UnknownProperty(key.to_string()))?;
        let validation = validate_field(definition, Some(&value));
        let cell = (id, key.to_string());

        if !validation.valid {
            tracing::debug!("Edit to {}/{} failed validation; not saving", id, key);
            let withdrawn = self.autosave.withdraw_field(id, key);
            if self.sync.discard_unconfirmed(id, key)?.is_some() || withdrawn > 0 {
                tracing::debug!("Earlier unsent value of {}/{} superseded", id, key);
            }
            self.invalid_edits.insert(cell, validation.errors.clone());
            return Ok(validation);
        }
        self.invalid_edits.remove(&cell);

        let changes = RecordData::from([(key.to_string(), value)]);
        self.sync.apply_optimistic(id, changes.clone())?;
        let write = self
            .autosave
            .schedule(WriteTarget::field(id, key), changes, Instant::now());
        self.arm(&write);
        Ok(validation)
    }

    /// Fire every pending write now. Returns how many were released.
    pub fn flush(&mut self) -> usize {
        let mut released = 0;
        for target in self.autosave.pending_targets() {
            let decision = self.autosave.fire_now(&target);
            if !matches!(decision, FireDecision::Superseded) {
                released += 1;
            }
            self.handle_decision(decision);
        }
        if released > 0 {
            tracing::debug!("Flushed {} pending write(s)", released);
        }
        released
    }

    /// Resend what a failed save left unconfirmed.
    ///
    /// Returns `false` when there is nothing to resend.
    pub fn retry(&mut self, row: RowRef) -> Result<bool> {
        let (target, changes) = match row {
            RowRef::Draft => {
                let draft = self.ledger.draft().ok_or(Error::NoDraft)?;
                let ready = draft.is_valid() && is_record_complete(&draft.data, &self.schema);
                if self.draft_error.is_none() || self.ledger.is_submitting() || !ready {
                    return Ok(false);
                }
                let payload = self.ledger.payload().ok_or(Error::NoDraft)?;
                self.draft_error = None;
                (WriteTarget::DraftCreate, payload)
            }
            RowRef::Record(id) => {
                let Some(changes) = self.sync.retry_changes(id)? else {
                    return Ok(false);
                };
                (WriteTarget::Record { record_id: id }, changes)
            }
        };
        tracing::info!("Retrying save for {}", row);
        let decision = self.autosave.submit(target, changes, Instant::now());
        self.handle_decision(decision);
        Ok(true)
    }

    /// Apply the operator's decision on the conflict for `record_id`.
    ///
    /// Writes queued while the conflict was open are dropped: `keep_local`
    /// already carries them in its resubmission, the other choices replace
    /// them.
    pub fn resolve_conflict(
        &mut self,
        record_id: RecordId,
        choice: ConflictChoice,
        merged: Option<RecordData>,
    ) -> Result<()> {
        let resubmit = self.sync.resolve_conflict(record_id, choice, merged)?;
        let row = RowRef::Record(record_id);
        let dropped = self.autosave.cancel_row(row);
        if dropped > 0 {
            tracing::debug!("Dropped {} write(s) queued during conflict on {}", dropped, record_id);
        }
        if let Some(next) = self.autosave.resume(row, false) {
            self.execute(next);
        }
        self.events
            .emit(EngineEvent::ConflictResolved { record_id, choice });

        if let Some(write) = resubmit {
            let decision = self.autosave.submit(
                WriteTarget::Record { record_id },
                write.changes,
                Instant::now(),
            );
            self.handle_decision(decision);
        }
        Ok(())
    }

    pub fn save_state(&self, row: RowRef) -> SaveState {
        match row {
            RowRef::Draft => {
                if self.autosave.is_saving(row) {
                    SaveState::Saving
                } else if let Some(error) = &self.draft_error {
                    SaveState::Failed(error.clone())
                } else if self.autosave.has_waiting(row) {
                    SaveState::Pending
                } else {
                    SaveState::Idle
                }
            }
            RowRef::Record(id) => match self.sync.status(id) {
                Some(SyncStatus::Conflicted) => SaveState::Conflicted,
                _ if self.autosave.is_saving(row) => SaveState::Saving,
                Some(SyncStatus::Failed(error)) => SaveState::Failed(error.clone()),
                Some(SyncStatus::Pending) => SaveState::Pending,
                _ if self.autosave.has_waiting(row) => SaveState::Pending,
                _ => SaveState::Idle,
            },
        }
    }

    /// No timers armed and no repository calls outstanding
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.autosave.is_idle()
    }

    /// Wait for the next timer or repository response and apply it.
    ///
    /// Returns `false` once nothing is outstanding.
    pub async fn process_next(&mut self) -> bool {
        if self.outstanding == 0 {
            return false;
        }
        let Some(message) = self.rx.recv().await else {
            return false;
        };
        self.outstanding -= 1;
        self.handle(message);
        true
    }

    /// Process messages until every timer and save has settled.
    pub async fn run_until_idle(&mut self) {
        while self.process_next().await {}
    }

    fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::TimerFired { target, generation } => {
                let decision = self.autosave.fire(&target, generation);
                self.handle_decision(decision);
            }
            SessionMessage::CreateFinished { result } => self.on_create_finished(result),
            SessionMessage::UpdateFinished { write, result } => {
                self.on_update_finished(&write, result);
            }
        }
    }

    fn handle_decision(&mut self, decision: FireDecision) {
        if let FireDecision::Ready(write) = decision {
            self.execute(write);
        }
    }

    fn execute(&mut self, write: PendingWrite) {
        let PendingWrite {
            target, changes, ..
        } = write;
        match target {
            WriteTarget::DraftCreate => {
                self.ledger.mark_submitted(changes.clone());
                let repository = Arc::clone(&self.repository);
                let table_id = self.table_id;
                tracing::debug!("Creating record from draft ({} fields)", changes.len());
                self.spawn(async move {
                    let result = repository.create_record(table_id, changes).await;
                    SessionMessage::CreateFinished { result }
                });
            }
            WriteTarget::Field { record_id, .. } | WriteTarget::Record { record_id } => {
                match self.sync.outgoing(record_id, changes) {
                    Ok(write) => {
                        let repository = Arc::clone(&self.repository);
                        tracing::debug!(
                            "Updating record {} at version {}",
                            record_id,
                            write.expected_version
                        );
                        self.spawn(async move {
                            let result = repository
                                .update_record(
                                    write.record_id,
                                    write.changes.clone(),
                                    write.expected_version,
                                )
                                .await;
                            SessionMessage::UpdateFinished { write, result }
                        });
                    }
                    Err(error) => {
                        tracing::warn!("Dropping write: {}", error);
                        self.finish_row(RowRef::Record(record_id));
                    }
                }
            }
        }
    }

    fn arm(&mut self, write: &PendingWrite) {
        let target = write.target.clone();
        let generation = write.generation;
        let due = write.due;
        self.spawn(async move {
            tokio::time::sleep_until(due).await;
            SessionMessage::TimerFired { target, generation }
        });
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = SessionMessage> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.outstanding += 1;
        tokio::spawn(async move {
            let message = task.await;
            if tx.send(message).is_err() {
                tracing::debug!("Editing session closed before task finished");
            }
        });
    }

    fn finish_row(&mut self, row: RowRef) {
        if let Some(next) = self.autosave.finish(row) {
            self.execute(next);
        }
    }

    fn on_create_finished(&mut self, result: Result<RecordSnapshot>) {
        match result {
            Ok(snapshot) => {
                let record_id = snapshot.id;
                let version = snapshot.version;
                let row = RowRef::Record(record_id);

                let leftovers = if self.ledger.is_submitting() {
                    let leftovers = self.ledger.commit(&snapshot).unwrap_or_else(|error| {
                        tracing::warn!("Draft commit failed: {}", error);
                        RecordData::new()
                    });
                    self.controller.retarget_row(RowRef::Draft, row);
                    if let Some(rows) = self.visible_rows.as_mut() {
                        for visible in rows.iter_mut().filter(|visible| visible.is_draft()) {
                            *visible = row;
                        }
                    }
                    self.draft_error = None;
                    leftovers
                } else {
                    tracing::warn!(
                        "Draft was discarded while its create was in flight; keeping record {}",
                        record_id
                    );
                    RecordData::new()
                };

                self.sync.insert(snapshot);
                self.events.emit(EngineEvent::DraftCommitted { record_id });
                self.events.emit(EngineEvent::Saved { record_id, version });
                self.finish_row(RowRef::Draft);

                if !leftovers.is_empty() {
                    if let Err(error) = self.sync.apply_optimistic(record_id, leftovers.clone()) {
                        tracing::warn!("Could not apply draft follow-up: {}", error);
                        return;
                    }
                    let decision = self.autosave.submit(
                        WriteTarget::Record { record_id },
                        leftovers,
                        Instant::now(),
                    );
                    self.handle_decision(decision);
                }
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!("Failed to create record from draft: {}", message);
                self.ledger.clear_submitted();
                if self.ledger.is_open() {
                    self.draft_error = Some(message.clone());
                }
                self.events.emit(EngineEvent::SaveError {
                    row: RowRef::Draft,
                    error: message,
                });
                self.finish_row(RowRef::Draft);
            }
        }
    }

    fn on_update_finished(&mut self, write: &OutgoingWrite, result: Result<UpdateOutcome>) {
        let record_id = write.record_id;
        let row = RowRef::Record(record_id);
        let reconciled = match self.sync.reconcile(write, result) {
            Ok(reconciled) => reconciled,
            Err(error) => {
                tracing::warn!("Dropping response for record {}: {}", record_id, error);
                self.finish_row(row);
                return;
            }
        };

        let mut retry = None;
        match reconciled {
            Reconciled::Committed { version } => {
                self.events.emit(EngineEvent::Saved { record_id, version });
            }
            Reconciled::Duplicate => {}
            Reconciled::Conflict(case) => {
                self.autosave.halt(row);
                self.events.emit(EngineEvent::ConflictRaised(case));
            }
            Reconciled::Retry(next) => retry = Some(next),
            Reconciled::Failed(error) => {
                self.events.emit(EngineEvent::SaveError { row, error });
            }
        }
        self.finish_row(row);

        if let Some(next) = retry {
            let decision = self.autosave.submit(
                WriteTarget::Record { record_id },
                next.changes,
                Instant::now(),
            );
            self.handle_decision(decision);
        }
    }
}
