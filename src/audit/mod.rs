//! Audit trail of webhook processing.
//!
//! Every delivery produces audit events: one per processed unit, one per
//! publish-state change, and one for a delivery that was ignored or failed
//! as a whole. Records are written outside any catalog transaction, so a
//! failure record survives the rollback of the work it describes.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod log;

pub use log::{AuditRecord, JsonlAuditLog};

/// Errors raised by audit sinks.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// What kind of notification an audit event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Push,
    Delete,
    Publish,
    Install,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// `owner/repo`.
    pub repository: String,
    /// The full git reference (`refs/heads/main`).
    pub git_reference: String,
    /// Username of the authenticated actor, if any.
    pub actor: Option<String>,
    pub event_type: AuditEventType,
    pub success: bool,
    /// True when the delivery (or a unit of it) was deliberately skipped.
    #[serde(default)]
    pub ignored: bool,
    pub message: String,
    pub delivery_id: String,
    /// Catalog path of the entry the record is about, if known.
    pub entry_name: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        repository: impl Into<String>,
        git_reference: impl Into<String>,
        delivery_id: impl Into<String>,
    ) -> Self {
        AuditEvent {
            repository: repository.into(),
            git_reference: git_reference.into(),
            actor: None,
            event_type,
            success: true,
            ignored: false,
            message: String::new(),
            delivery_id: delivery_id.into(),
            entry_name: None,
        }
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_entry(mut self, entry_name: impl Into<String>) -> Self {
        self.entry_name = Some(entry_name.into());
        self
    }

    pub fn succeeded(mut self, message: impl Into<String>) -> Self {
        self.success = true;
        self.message = message.into();
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.message = message.into();
        self
    }

    /// Marks the event as a deliberate skip. Skips are successful.
    pub fn ignored(mut self, message: impl Into<String>) -> Self {
        self.success = true;
        self.ignored = true;
        self.message = message.into();
        self
    }
}

/// Records audit events. Must be usable outside any catalog transaction.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Keeps audit events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Unavailable("memory sink lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}
