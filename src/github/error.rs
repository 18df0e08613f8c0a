//! Mapping of octocrab errors onto [`SourceControlError`].
//!
//! GitHub signals rate limiting with either 429 or a 403 whose message
//! mentions the rate limit, so the message is inspected as well as the
//! status.

use crate::source::{SourceControlError, SourceErrorKind};

/// Categorizes an octocrab error.
pub fn from_octocrab(err: octocrab::Error) -> SourceControlError {
    let status_code = extract_status_code(&err);
    let message = err.to_string();

    let kind = if is_retry_later_message(&message) {
        SourceErrorKind::Transient
    } else {
        SourceControlError::classify(status_code, &message)
    };

    let mut error = SourceControlError::new(kind, message).with_source(err);
    error.status_code = status_code;
    error
}

/// Builds an error for a response that carried a failing status but no
/// octocrab error (raw requests).
pub fn from_status(status_code: u16, context: impl Into<String>) -> SourceControlError {
    let message = context.into();
    let kind = SourceControlError::classify(Some(status_code), &message);
    SourceControlError::new(kind, message).with_status(status_code)
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// API errors carry the status directly. Other variants only mention it in
/// their message, so those are parsed from the rendered text.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }

    let err_str = err.to_string();
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    if err_str.contains("404") && err_str.to_lowercase().contains("not found") {
        return Some(404);
    }
    [429, 403, 401, 422, 500, 502, 503, 504]
        .into_iter()
        .find(|code| err_str.contains(&code.to_string()))
}

/// Messages GitHub uses for conditions that clear up on their own.
fn is_retry_later_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("try again") || message_lower.contains("server error")
}
