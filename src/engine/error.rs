//! Engine error taxonomy.
//!
//! Per-unit failures are [`UnitError`]s. Each one is classified as either
//! terminal for its unit (recorded, processing continues) or fatal for the
//! whole delivery. [`SyncError`] is what the engine surfaces to its caller.

use thiserror::Error;

use crate::audit::AuditError;
use crate::source::{SourceControlError, SourceErrorKind};
use crate::store::StoreError;
use crate::types::EntryKind;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The unit is abandoned; later units still run.
    PerUnitTerminal,
    /// The delivery is abandoned.
    Fatal { retryable: bool },
}

/// A failure while reconciling one declared unit.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("invalid {kind}: {reason}")]
    InvalidUnit { kind: EntryKind, reason: String },

    #[error("path {path} is already used by a {existing}")]
    PathCollision { path: String, existing: EntryKind },

    #[error(
        "{path} is registered as {existing_language}/{existing_subclass}, \
         the manifest declares {declared_language}/{declared_subclass}"
    )]
    IncompatibleDescriptor {
        path: String,
        existing_language: String,
        existing_subclass: String,
        declared_language: String,
        declared_subclass: String,
    },

    #[error("{0} is archived and cannot be modified")]
    Archived(String),

    #[error("version {version} of {path} exceeds a limit: {reason}")]
    LimitExceeded {
        path: String,
        version: String,
        reason: String,
    },

    #[error("user {0} has no account in this registry")]
    NoLocalUser(String),

    #[error(transparent)]
    Remote(#[from] SourceControlError),

    #[error("catalog error: {0}")]
    Store(#[from] StoreError),
}

impl UnitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            UnitError::Remote(e) => match e.kind {
                SourceErrorKind::NotFound | SourceErrorKind::Permanent => {
                    ErrorClass::PerUnitTerminal
                }
                SourceErrorKind::RateLimited | SourceErrorKind::Transient => {
                    ErrorClass::Fatal { retryable: true }
                }
            },
            UnitError::Store(e) => ErrorClass::Fatal {
                retryable: e.is_retriable(),
            },
            _ => ErrorClass::PerUnitTerminal,
        }
    }
}

/// The error surfaced to the engine's caller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The manifest could not be fetched or parsed; no unit was processed.
    #[error("manifest unreadable: {0}")]
    ManifestUnreadable(String),

    /// Processing was abandoned part-way.
    #[error("{message}")]
    Fatal { message: String, retryable: bool },

    /// Some units failed and the caller asked to be told.
    #[error("{failed} of {total} declared units failed")]
    Incomplete { failed: usize, total: usize },
}

impl SyncError {
    pub fn fatal(message: impl Into<String>, retryable: bool) -> Self {
        SyncError::Fatal {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the upstream relay should redeliver the notification.
    pub fn should_retry(&self) -> bool {
        matches!(self, SyncError::Fatal { retryable: true, .. })
    }

    /// HTTP status signalling the retry decision: 500 asks for a retry,
    /// 418 tells the relay not to bother.
    pub fn status_code(&self) -> u16 {
        if self.should_retry() { 500 } else { 418 }
    }
}

impl From<SourceControlError> for SyncError {
    fn from(e: SourceControlError) -> Self {
        let retryable = e.kind.is_retriable();
        SyncError::fatal(e.to_string(), retryable)
    }
}

impl From<AuditError> for SyncError {
    fn from(e: AuditError) -> Self {
        SyncError::fatal(format!("audit sink failed: {}", e), false)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        let retryable = e.is_retriable();
        SyncError::fatal(format!("catalog failed: {}", e), retryable)
    }
}
