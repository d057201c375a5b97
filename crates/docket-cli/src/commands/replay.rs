use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docket_core::models::DraftRecord;
use docket_core::{
    ActiveCell, ConflictCase, ConflictChoice, Direction, EditingSession, EngineEvent, FieldValue,
    MemoryRepository, MemorySchemaService, RecordData, RecordId, RowRef, SaveState,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

use crate::commands::common::{
    format_record_line, format_value, load_config, load_records, load_schema, parse_row,
    read_json,
};
use crate::error::CliError;

/// One scripted user or server action
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    Focus {
        row: String,
        property: String,
    },
    Blur,
    Navigate {
        direction: Direction,
    },
    Cancel,
    StartDraft,
    Change {
        row: String,
        property: String,
        value: FieldValue,
    },
    HideDraft,
    /// Let time pass while timers and saves complete
    Wait {
        ms: u64,
    },
    /// Wait until every pending write has settled
    Settle,
    Flush,
    Resolve {
        row: String,
        choice: ConflictChoice,
        #[serde(default)]
        merged: Option<RecordData>,
    },
    Retry {
        row: String,
    },
    /// Another client writes the record, bumping its version
    ServerEdit {
        row: String,
        changes: RecordData,
    },
    FailNextSave {
        #[serde(default = "default_failure")]
        message: String,
    },
}

impl ScriptStep {
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Focus { .. } => "focus",
            Self::Blur => "blur",
            Self::Navigate { .. } => "navigate",
            Self::Cancel => "cancel",
            Self::StartDraft => "start_draft",
            Self::Change { .. } => "change",
            Self::HideDraft => "hide_draft",
            Self::Wait { .. } => "wait",
            Self::Settle => "settle",
            Self::Flush => "flush",
            Self::Resolve { .. } => "resolve",
            Self::Retry { .. } => "retry",
            Self::ServerEdit { .. } => "server_edit",
            Self::FailNextSave { .. } => "fail_next_save",
        }
    }
}

fn default_failure() -> String {
    "simulated failure".to_string()
}

#[derive(Debug, Serialize)]
pub struct RecordReport {
    pub id: RecordId,
    /// Last version this session saw confirmed
    pub version: u64,
    /// Version held by the repository
    pub persisted_version: Option<u64>,
    pub save_state: SaveState,
    pub data: RecordData,
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub records: Vec<RecordReport>,
    pub draft: Option<DraftRecord>,
    pub active_cell: Option<ActiveCell>,
    pub conflicts: Vec<ConflictCase>,
    pub events: Vec<EngineEvent>,
    /// Events dropped because the log fell behind
    pub lagged: u64,
}

/// Drives an editing session through a script and records what it emits
pub struct ReplayRunner {
    session: EditingSession,
    repository: MemoryRepository,
    events: broadcast::Receiver<EngineEvent>,
    log: Vec<EngineEvent>,
    lagged: u64,
}

impl ReplayRunner {
    pub fn new(session: EditingSession, repository: MemoryRepository) -> Self {
        let events = session.subscribe();
        Self {
            session,
            repository,
            events,
            log: Vec::new(),
            lagged: 0,
        }
    }

    pub const fn session(&self) -> &EditingSession {
        &self.session
    }

    /// Apply every step, then let outstanding saves settle.
    pub async fn run(&mut self, steps: &[ScriptStep]) -> Result<(), CliError> {
        for (index, step) in steps.iter().enumerate() {
            tracing::debug!(step = index + 1, op = step.op(), "Replaying step");
            self.apply(step).await.map_err(|error| match error {
                CliError::Core(source) => CliError::Step {
                    step: index + 1,
                    op: step.op(),
                    source,
                },
                other => other,
            })?;
            self.collect_events();
        }
        self.session.run_until_idle().await;
        self.collect_events();
        Ok(())
    }

    async fn apply(&mut self, step: &ScriptStep) -> Result<(), CliError> {
        match step {
            ScriptStep::Focus { row, property } => {
                let row = self.row(row)?;
                self.session.focus(row, property.clone())?;
            }
            ScriptStep::Blur => {
                self.session.blur();
            }
            ScriptStep::Navigate { direction } => {
                self.session.navigate(*direction)?;
            }
            ScriptStep::Cancel => {
                if !self.session.cancel()? {
                    tracing::info!("Cancel ignored: draft holds data");
                }
            }
            ScriptStep::StartDraft => self.session.start_draft()?,
            ScriptStep::Change {
                row,
                property,
                value,
            } => {
                let row = self.row(row)?;
                let validation = self.session.change(row, property, value.clone())?;
                if !validation.valid {
                    tracing::info!(
                        "Edit to {}/{} rejected: {}",
                        row,
                        property,
                        validation.errors.join("; ")
                    );
                }
            }
            ScriptStep::HideDraft => {
                self.session.hide_draft();
            }
            ScriptStep::Wait { ms } => self.wait(Duration::from_millis(*ms)).await,
            ScriptStep::Settle => self.session.run_until_idle().await,
            ScriptStep::Flush => {
                self.session.flush();
            }
            ScriptStep::Resolve {
                row,
                choice,
                merged,
            } => {
                let id = self.record(row)?;
                self.session.resolve_conflict(id, *choice, merged.clone())?;
            }
            ScriptStep::Retry { row } => {
                let row = self.row(row)?;
                if !self.session.retry(row)? {
                    tracing::info!("Nothing to retry for {}", row);
                }
            }
            ScriptStep::ServerEdit { row, changes } => {
                let id = self.record(row)?;
                self.repository.external_update(id, changes.clone()).await?;
            }
            ScriptStep::FailNextSave { message } => {
                self.repository.fail_next(message.clone()).await;
            }
        }
        Ok(())
    }

    fn row(&self, selector: &str) -> Result<RowRef, CliError> {
        parse_row(selector, self.session.record_ids())
    }

    fn record(&self, selector: &str) -> Result<RecordId, CliError> {
        self.row(selector)?
            .record_id()
            .ok_or_else(|| CliError::UnknownRow(selector.to_string()))
    }

    async fn wait(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            match tokio::time::timeout_at(deadline, self.session.process_next()).await {
                Ok(true) => self.collect_events(),
                Ok(false) => {
                    tokio::time::sleep_until(deadline).await;
                    break;
                }
                Err(_) => break,
            }
        }
    }

    fn collect_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.log.push(event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!("Event log fell behind; {} event(s) dropped", missed);
                    self.lagged += missed;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    pub async fn report(&self) -> ReplayReport {
        let mut records = Vec::new();
        for &id in self.session.record_ids() {
            let Some(data) = self.session.record(id) else {
                continue;
            };
            records.push(RecordReport {
                id,
                version: self
                    .session
                    .confirmed(id)
                    .map_or(0, |snapshot| snapshot.version),
                persisted_version: self.repository.get(id).await.map(|record| record.version),
                save_state: self.session.save_state(RowRef::Record(id)),
                data,
            });
        }

        let conflicts = self
            .session
            .record_ids()
            .iter()
            .filter_map(|id| self.session.conflict(*id).cloned())
            .collect();

        ReplayReport {
            records,
            draft: self.session.draft().cloned(),
            active_cell: self.session.active_cell().cloned(),
            conflicts,
            events: self.log.clone(),
            lagged: self.lagged,
        }
    }
}

pub async fn run_replay(
    schema_path: &Path,
    records_path: Option<&Path>,
    script_path: &Path,
    config_path: Option<&Path>,
    as_json: bool,
) -> Result<(), CliError> {
    let schema = load_schema(schema_path)?;
    let records = load_records(records_path, schema.table_id)?;
    let steps: Vec<ScriptStep> = read_json(script_path)?;
    let config = load_config(config_path)?;

    let repository = MemoryRepository::with_records(records.clone());
    let schemas = MemorySchemaService::new().with_table(schema.table_id, schema.properties);
    let session = EditingSession::open(
        schema.table_id,
        &schemas,
        records,
        Arc::new(repository.clone()),
        config,
    )
    .await?;

    tracing::info!("Replaying {} step(s)", steps.len());
    let mut runner = ReplayRunner::new(session, repository);
    runner.run(&steps).await?;
    let report = runner.report().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_report(report: &ReplayReport) -> Vec<String> {
    let mut lines = vec![format!("Records ({}):", report.records.len())];
    lines.extend(report.records.iter().map(|record| {
        format!(
            "  {}",
            format_record_line(record.id, record.version, &record.save_state, &record.data)
        )
    }));

    match &report.draft {
        Some(draft) => {
            let fields = draft
                .data
                .iter()
                .map(|(key, value)| format!("{key}={}", format_value(value)))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!(
                "Draft: {fields} ({} field error(s))",
                draft.validation_errors.len()
            ));
        }
        None => lines.push("Draft: none".to_string()),
    }

    lines.push(match &report.active_cell {
        Some(cell) => format!("Active cell: {cell}"),
        None => "Active cell: none".to_string(),
    });

    if report.conflicts.is_empty() {
        lines.push("Conflicts: none".to_string());
    } else {
        lines.push(format!("Conflicts ({}):", report.conflicts.len()));
        lines.extend(report.conflicts.iter().map(|case| {
            format!(
                "  {}  local v{} vs server v{}  diverging: {}",
                case.record_id,
                case.local_version,
                case.server_version,
                case.diverging_keys().join(", ")
            )
        }));
    }

    lines.push(format!("Events: {}", report.events.len()));
    if report.lagged > 0 {
        lines.push(format!("Events dropped: {}", report.lagged));
    }
    lines
}
