//! Debounced, coalesced autosave scheduling
//!
//! Every edit becomes a [`PendingWrite`] keyed by its target. Scheduling a
//! target again replaces the pending write and bumps its generation, so a
//! timer armed for an older generation finds itself superseded when it
//! fires. The scheduler itself never sleeps or performs I/O: the session
//! arms the timers and executes the writes it hands out.
//!
//! Writes to one row are serialized by a per-row saving guard. A write whose
//! timer fires while its row is saving (or halted by a conflict) is held and
//! released when the row frees up. Different rows never wait on each other.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::models::{RecordData, RecordId, RowRef};
use crate::util::unix_millis_now;

/// What a pending write persists
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WriteTarget {
    /// Create of the draft row
    DraftCreate,
    /// One field of an existing record
    Field {
        record_id: RecordId,
        property_key: String,
    },
    /// Several fields of an existing record at once (retries, conflict
    /// resolutions, follow-ups after a draft commit)
    Record { record_id: RecordId },
}

impl WriteTarget {
    pub fn field(record_id: RecordId, property_key: impl Into<String>) -> Self {
        Self::Field {
            record_id,
            property_key: property_key.into(),
        }
    }

    pub const fn row(&self) -> RowRef {
        match self {
            Self::DraftCreate => RowRef::Draft,
            Self::Field { record_id, .. } | Self::Record { record_id } => {
                RowRef::Record(*record_id)
            }
        }
    }

    pub fn property_key(&self) -> Option<&str> {
        match self {
            Self::Field { property_key, .. } => Some(property_key),
            Self::DraftCreate | Self::Record { .. } => None,
        }
    }
}

impl fmt::Display for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DraftCreate => write!(f, "draft/create"),
            Self::Field {
                record_id,
                property_key,
            } => write!(f, "{record_id}/{property_key}"),
            Self::Record { record_id } => write!(f, "{record_id}/*"),
        }
    }
}

/// A write waiting for its settle window or for its row to free up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub target: WriteTarget,
    /// Values to persist: the full payload for a create, the changed
    /// field(s) for an update
    pub changes: RecordData,
    /// When the write was (re)scheduled (Unix ms)
    pub scheduled_at: i64,
    /// Increases on every reschedule of any target
    pub generation: u64,
    /// When the settle window elapses
    pub due: Instant,
}

/// What to do with a fired timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireDecision {
    /// A newer edit replaced this write; do nothing
    Superseded,
    /// The row is busy; the write runs once it frees up
    Held,
    /// Execute now; the row is marked as saving
    Ready(PendingWrite),
}

/// Coalesces edits into writes and guards rows against concurrent saves
#[derive(Debug)]
pub struct AutosaveScheduler {
    draft_settle: Duration,
    field_settle: Duration,
    next_generation: u64,
    pending: HashMap<WriteTarget, PendingWrite>,
    held: HashMap<RowRef, Vec<PendingWrite>>,
    saving: HashSet<RowRef>,
    halted: HashSet<RowRef>,
}

impl AutosaveScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            draft_settle: config.draft_settle(),
            field_settle: config.field_settle(),
            next_generation: 0,
            pending: HashMap::new(),
            held: HashMap::new(),
            saving: HashSet::new(),
            halted: HashSet::new(),
        }
    }

    const fn settle_for(&self, target: &WriteTarget) -> Duration {
        match target {
            WriteTarget::DraftCreate => self.draft_settle,
            WriteTarget::Field { .. } | WriteTarget::Record { .. } => self.field_settle,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Schedule (or reschedule) the write for `target`.
    ///
    /// Any pending write for the same target is replaced and the settle
    /// window restarts. The caller arms a timer for the returned write.
    pub fn schedule(&mut self, target: WriteTarget, changes: RecordData, now: Instant) -> PendingWrite {
        let write = PendingWrite {
            due: now + self.settle_for(&target),
            generation: self.next_generation(),
            scheduled_at: unix_millis_now(),
            changes,
            target: target.clone(),
        };
        if let Some(previous) = self.pending.insert(target, write.clone()) {
            tracing::debug!(
                "Coalesced write for {} (generation {} -> {})",
                write.target,
                previous.generation,
                write.generation
            );
        } else {
            tracing::debug!("Scheduled write for {}", write.target);
        }
        write
    }

    /// Timer for (`target`, `generation`) elapsed.
    pub fn fire(&mut self, target: &WriteTarget, generation: u64) -> FireDecision {
        match self.pending.get(target) {
            Some(write) if write.generation == generation => {}
            _ => return FireDecision::Superseded,
        }
        let Some(write) = self.pending.remove(target) else {
            return FireDecision::Superseded;
        };
        self.dispatch(write)
    }

    /// Fire the pending write for `target` without waiting for its window.
    pub fn fire_now(&mut self, target: &WriteTarget) -> FireDecision {
        match self.pending.remove(target) {
            Some(write) => self.dispatch(write),
            None => FireDecision::Superseded,
        }
    }

    /// Submit a write that skips debouncing but still honours the row guard.
    pub fn submit(&mut self, target: WriteTarget, changes: RecordData, now: Instant) -> FireDecision {
        let write = PendingWrite {
            due: now,
            generation: self.next_generation(),
            scheduled_at: unix_millis_now(),
            changes,
            target,
        };
        self.dispatch(write)
    }

    fn dispatch(&mut self, write: PendingWrite) -> FireDecision {
        let row = write.target.row();
        if self.saving.contains(&row) || self.halted.contains(&row) {
            tracing::debug!("Holding write for {} until {} is free", write.target, row);
            self.hold(write);
            return FireDecision::Held;
        }
        self.saving.insert(row);
        FireDecision::Ready(write)
    }

    fn hold(&mut self, write: PendingWrite) {
        let queue = self.held.entry(write.target.row()).or_default();
        match queue.iter_mut().find(|held| held.target == write.target) {
            Some(existing) => {
                if matches!(write.target, WriteTarget::Record { .. }) {
                    existing.changes.extend(write.changes);
                } else {
                    existing.changes = write.changes;
                }
                existing.generation = write.generation;
                existing.scheduled_at = write.scheduled_at;
            }
            None => queue.push(write),
        }
    }

    fn release_next(&mut self, row: RowRef) -> Option<PendingWrite> {
        if self.saving.contains(&row) || self.halted.contains(&row) {
            return None;
        }
        let queue = self.held.get_mut(&row)?;
        let next = (!queue.is_empty()).then(|| queue.remove(0));
        if queue.is_empty() {
            self.held.remove(&row);
        }
        let next = next?;
        self.saving.insert(row);
        Some(next)
    }

    /// The in-flight write for `row` resolved (success or error).
    ///
    /// Returns the next held write for the row, already marked as saving.
    pub fn finish(&mut self, row: RowRef) -> Option<PendingWrite> {
        self.saving.remove(&row);
        self.release_next(row)
    }

    /// Stop dispatching writes for `row` until [`Self::resume`].
    pub fn halt(&mut self, row: RowRef) {
        self.halted.insert(row);
    }

    /// Lift a halt. Held writes are kept and the next one returned when
    /// `keep_held`, otherwise they are dropped.
    pub fn resume(&mut self, row: RowRef, keep_held: bool) -> Option<PendingWrite> {
        self.halted.remove(&row);
        if !keep_held {
            self.drop_row_writes(row);
        }
        self.release_next(row)
    }

    /// Drop the pending write for `target`, if any.
    pub fn cancel(&mut self, target: &WriteTarget) -> Option<PendingWrite> {
        let cancelled = self.pending.remove(target);
        if cancelled.is_some() {
            tracing::debug!("Cancelled pending write for {}", target);
        }
        cancelled
    }

    /// Withdraw every unsent value for one field of a record.
    ///
    /// Drops its pending write, its held write, and the key from held
    /// multi-field writes of the same record. Returns how many writes were
    /// touched. A write already in flight is not affected.
    pub fn withdraw_field(&mut self, record_id: RecordId, property_key: &str) -> usize {
        let target = WriteTarget::field(record_id, property_key);
        let mut touched = usize::from(self.cancel(&target).is_some());
        let row = RowRef::Record(record_id);
        if let Some(queue) = self.held.get_mut(&row) {
            let before = queue.len();
            queue.retain_mut(|write| {
                if write.target == target {
                    return false;
                }
                if matches!(write.target, WriteTarget::Record { .. })
                    && write.changes.remove(property_key).is_some()
                {
                    touched += 1;
                    return !write.changes.is_empty();
                }
                true
            });
            touched += before - queue.len();
            if queue.is_empty() {
                self.held.remove(&row);
            }
        }
        touched
    }

    /// Drop every pending and held write of `row`. Returns how many.
    pub fn cancel_row(&mut self, row: RowRef) -> usize {
        let before = self.pending.len();
        self.pending.retain(|target, _| target.row() != row);
        let pending = before - self.pending.len();
        pending + self.drop_row_writes(row)
    }

    fn drop_row_writes(&mut self, row: RowRef) -> usize {
        self.held.remove(&row).map_or(0, |queue| queue.len())
    }

    /// Targets with a pending write, for flushing
    pub fn pending_targets(&self) -> Vec<WriteTarget> {
        self.pending.keys().cloned().collect()
    }

    pub fn is_saving(&self, row: RowRef) -> bool {
        self.saving.contains(&row)
    }

    /// Whether `row` has writes waiting (debouncing or held)
    pub fn has_waiting(&self, row: RowRef) -> bool {
        self.held.get(&row).is_some_and(|queue| !queue.is_empty())
            || self.pending.keys().any(|target| target.row() == row)
    }

    /// Number of writes in their settle window
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// No pending, held or in-flight writes
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.held.is_empty() && self.saving.is_empty()
    }
}
