//! Draft row lifecycle
//!
//! At most one draft exists per table view. It accumulates values and their
//! validation errors until it is complete and valid, at which point the
//! caller schedules a create. The ledger remembers the payload that was
//! submitted so edits typed while the create is in flight are not lost.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{property, DraftRecord, FieldValue, PropertyMap, RecordData, RecordSnapshot};
use crate::util::{is_blank, unix_millis_now};
use crate::validation::{is_record_complete, validate_field, FieldValidation};

/// Result of storing one draft value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftFieldOutcome {
    pub validation: FieldValidation,
    /// The draft is complete and every entered value is valid
    pub ready: bool,
}

/// Owns the single in-progress new record
#[derive(Debug, Default)]
pub struct DraftRecordLedger {
    draft: Option<DraftRecord>,
    submitted: Option<RecordData>,
}

impl DraftRecordLedger {
    pub const fn new() -> Self {
        Self {
            draft: None,
            submitted: None,
        }
    }

    pub const fn draft(&self) -> Option<&DraftRecord> {
        self.draft.as_ref()
    }

    pub const fn is_open(&self) -> bool {
        self.draft.is_some()
    }

    /// Whether a create for this draft is in flight
    pub const fn is_submitting(&self) -> bool {
        self.submitted.is_some()
    }

    /// Open an empty draft and return the key of its first property.
    pub fn start(&mut self, schema: &PropertyMap) -> Result<Option<String>> {
        if self.draft.is_some() {
            return Err(Error::DraftInProgress);
        }
        self.draft = Some(DraftRecord::new());
        self.submitted = None;
        tracing::info!("Started draft record");
        Ok(property::ordered(schema)
            .first()
            .map(|definition| definition.key.clone()))
    }

    /// Store a value, validate it and report whether the draft can be created.
    pub fn set_field(
        &mut self,
        key: &str,
        value: FieldValue,
        schema: &PropertyMap,
    ) -> Result<DraftFieldOutcome> {
        let draft = self.draft.as_mut().ok_or(Error::NoDraft)?;
        let definition = schema
            .get(key)
            .ok_or_else(|| Error::UnknownProperty(key.to_string()))?;

        let validation = validate_field(definition, Some(&value));
        if validation.errors.is_empty() {
            draft.validation_errors.remove(key);
        } else {
            draft
                .validation_errors
                .insert(key.to_string(), validation.errors.clone());
        }
        draft.data.insert(key.to_string(), value);
        draft.last_modified = unix_millis_now();

        let ready = draft.is_valid() && is_record_complete(&draft.data, schema);
        Ok(DraftFieldOutcome { validation, ready })
    }

    /// Values to send in a create: blank fields are left out.
    pub fn payload(&self) -> Option<RecordData> {
        self.draft.as_ref().map(|draft| {
            draft
                .data
                .iter()
                .filter(|(_, value)| !is_blank(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
    }

    /// Remember the payload of the create that is now in flight.
    pub fn mark_submitted(&mut self, payload: RecordData) {
        self.submitted = Some(payload);
    }

    /// Forget a failed submission; the draft stays for a retry.
    pub fn clear_submitted(&mut self) {
        self.submitted = None;
    }

    /// Discard the draft only if it holds no data.
    ///
    /// Returns `Ok(false)` and keeps the draft when any field is non-empty.
    pub fn cancel(&mut self) -> Result<bool> {
        let draft = self.draft.as_ref().ok_or(Error::NoDraft)?;
        if draft.has_content() {
            tracing::debug!("Ignoring cancel of draft that holds data");
            return Ok(false);
        }
        self.draft = None;
        self.submitted = None;
        tracing::info!("Cancelled empty draft record");
        Ok(true)
    }

    /// Drop the draft row regardless of its content.
    pub fn hide(&mut self) -> Option<DraftRecord> {
        self.submitted = None;
        let hidden = self.draft.take();
        if hidden.is_some() {
            tracing::info!("Hid draft record");
        }
        hidden
    }

    /// Consume the draft after its create succeeded.
    ///
    /// Returns the values edited after the create was submitted, which the
    /// caller applies to the new record as a follow-up update.
    pub fn commit(&mut self, server_record: &RecordSnapshot) -> Result<RecordData> {
        let draft = self.draft.take().ok_or_else(|| {
            Error::IntegrityViolation(format!(
                "create for {} returned but no draft is open",
                server_record.id
            ))
        })?;
        let submitted = self.submitted.take().unwrap_or_default();

        let leftovers: RecordData = draft
            .data
            .into_iter()
            .filter(|(key, _)| !draft.validation_errors.contains_key(key))
            .filter(|(key, value)| match submitted.get(key) {
                Some(sent) => sent != value,
                None => !is_blank(value),
            })
            .collect();

        tracing::info!(
            "Draft committed as record {} ({} follow-up field(s))",
            server_record.id,
            leftovers.len()
        );
        Ok(leftovers)
    }
}
