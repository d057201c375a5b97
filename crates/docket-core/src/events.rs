//! Events emitted toward the presentation layer

use serde::Serialize;
use tokio::sync::broadcast;

use crate::editing::Direction;
use crate::models::{ConflictCase, ConflictChoice, FieldValue, RecordId, RowRef};

/// Something the editing engine did that a view may want to reflect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Focus {
        row: RowRef,
        property_key: String,
    },
    Blur {
        row: RowRef,
        property_key: String,
    },
    Change {
        row: RowRef,
        property_key: String,
        value: FieldValue,
    },
    Navigate {
        direction: Direction,
    },
    Cancel,
    DraftStarted,
    DraftDiscarded,
    DraftCommitted {
        record_id: RecordId,
    },
    Saved {
        record_id: RecordId,
        version: u64,
    },
    ConflictRaised(ConflictCase),
    ConflictResolved {
        record_id: RecordId,
        choice: ConflictChoice,
    },
    SaveError {
        row: RowRef,
        error: String,
    },
}

impl EngineEvent {
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Focus { .. } => "focus",
            Self::Blur { .. } => "blur",
            Self::Change { .. } => "change",
            Self::Navigate { .. } => "navigate",
            Self::Cancel => "cancel",
            Self::DraftStarted => "draft_started",
            Self::DraftDiscarded => "draft_discarded",
            Self::DraftCommitted { .. } => "draft_committed",
            Self::Saved { .. } => "saved",
            Self::ConflictRaised(_) => "conflict_raised",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::SaveError { .. } => "save_error",
        }
    }
}

/// Fan-out of engine events to any number of subscribers.
///
/// Slow subscribers lag and miss events; the engine never waits on them.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: EngineEvent) {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::trace!(event_type, receivers, "Emitted engine event");
            }
            Err(_) => {
                tracing::trace!(event_type, "No subscribers for engine event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
