//! Source control error types.
//!
//! Errors are classified by what the caller can do about them:
//!
//! - **NotFound**: the repository, reference or file does not exist
//! - **RateLimited**: the API quota is exhausted; retry later
//! - **Transient**: backing-service 5xx or network failure; retry later
//! - **Permanent**: anything else; retrying will not help

use std::fmt;
use thiserror::Error;

/// The kind of source control error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    NotFound,
    RateLimited,
    Transient,
    Permanent,
}

impl SourceErrorKind {
    /// Returns true if waiting and retrying the whole operation can succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SourceErrorKind::RateLimited | SourceErrorKind::Transient)
    }
}

/// A source control error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct SourceControlError {
    pub kind: SourceErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying client error, if available.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for SourceControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "source control error (HTTP {}): {}", code, self.message),
            None => write!(f, "source control error: {}", self.message),
        }
    }
}

impl SourceControlError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message).with_status(404)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Permanent, message)
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == SourceErrorKind::NotFound
    }

    /// Classifies an HTTP status and message.
    ///
    /// 404 is NotFound; 429, and 403 with a rate-limit message, are
    /// RateLimited; 5xx is Transient; other statuses are Permanent. Without
    /// a status, network-looking messages are Transient.
    pub fn classify(status_code: Option<u16>, message: &str) -> SourceErrorKind {
        match status_code {
            Some(404) => SourceErrorKind::NotFound,
            Some(429) => SourceErrorKind::RateLimited,
            Some(403) if is_rate_limit_message(message) => SourceErrorKind::RateLimited,
            Some(code) if (500..600).contains(&code) => SourceErrorKind::Transient,
            Some(_) => SourceErrorKind::Permanent,
            None if is_rate_limit_message(message) => SourceErrorKind::RateLimited,
            None if is_network_message(message) => SourceErrorKind::Transient,
            None => SourceErrorKind::Permanent,
        }
    }
}

/// Checks if an error message indicates a rate limit.
pub(crate) fn is_rate_limit_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
pub(crate) fn is_network_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
