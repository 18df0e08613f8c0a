//! Push and delete notification handlers.
//!
//! The relay posts one JSON document per notification and identifies the
//! upstream delivery in the `X-GitHub-Delivery` header.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::audit::AuditSink;
use crate::engine::{DeleteEvent, PushEvent, PushSummary, SyncError};
use crate::source::SourceControlClient;
use crate::store::CatalogStore;
use crate::types::{CommitHash, DeliveryId, GitReference, InvalidRepoPath, RepoPath};

/// Header name for the upstream delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";

/// Errors that can occur when handling a notification.
#[derive(Debug, Error)]
pub enum IngressError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Invalid JSON body.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidRepository(#[from] InvalidRepoPath),

    /// The engine gave up on the notification.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Error body returned for engine failures.
#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    /// Whether the relay should redeliver.
    retry: bool,
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match &self {
            IngressError::Sync(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = ErrorBody {
                    message: e.to_string(),
                    retry: e.should_retry(),
                };
                (status, Json(body)).into_response()
            }
            IngressError::MissingHeader(_)
            | IngressError::InvalidJson(_)
            | IngressError::InvalidRepository(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
        }
    }
}

/// Body of `POST /lambdaEvents/push`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// `owner/repo`.
    pub repository: String,
    pub git_reference: String,
    /// The pusher first, then other contributors.
    #[serde(default)]
    pub usernames: Vec<String>,
    pub installation_id: Option<u64>,
    pub after_commit: Option<String>,
}

/// Body of `POST /lambdaEvents/delete`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    pub repository: String,
    pub git_reference: String,
    pub username: Option<String>,
    pub installation_id: Option<u64>,
}

/// Body of a successful push response.
#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub ignored: Option<String>,
    pub reconciled: Vec<String>,
    pub filtered: Vec<String>,
}

impl From<PushSummary> for PushResponse {
    fn from(summary: PushSummary) -> Self {
        PushResponse {
            ignored: summary.ignored,
            reconciled: summary.reconciled,
            filtered: summary.filtered,
        }
    }
}

/// Push handler.
///
/// Unit failures are surfaced, so the status tells the relay what to do:
///
/// - 200 OK: every unit reconciled, or the push was stale
/// - 400 Bad Request: missing header or malformed body
/// - 418: processing failed and a retry will not help
/// - 500 Internal Server Error: processing failed; redeliver later
pub async fn push_handler<S, C, A>(
    State(app_state): State<AppState<S, C, A>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PushResponse>), IngressError>
where
    S: SourceControlClient + 'static,
    C: CatalogStore + 'static,
    A: AuditSink + 'static,
{
    let delivery_id = delivery_id(&headers)?;
    let payload: PushPayload = serde_json::from_slice(&body)?;
    let repository = RepoPath::parse(&payload.repository)?;

    debug!(
        delivery_id = %delivery_id,
        repository = %repository,
        reference = %payload.git_reference,
        "Received push"
    );

    let event = PushEvent {
        repository,
        git_reference: GitReference::parse(payload.git_reference),
        actor_usernames: payload.usernames,
        installation_id: payload.installation_id,
        delivery_id,
        after_commit: payload.after_commit.map(CommitHash::from),
        throw_if_not_successful: true,
    };

    match app_state.engine().handle_push(event).await {
        Ok(summary) => Ok((StatusCode::OK, Json(summary.into()))),
        Err(e) => {
            warn!(error = %e, retry = e.should_retry(), "Push failed");
            Err(e.into())
        }
    }
}

/// Delete handler. Failures are recorded to the audit trail, never returned.
pub async fn delete_handler<S, C, A>(
    State(app_state): State<AppState<S, C, A>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, IngressError>
where
    S: SourceControlClient + 'static,
    C: CatalogStore + 'static,
    A: AuditSink + 'static,
{
    let delivery_id = delivery_id(&headers)?;
    let payload: DeletePayload = serde_json::from_slice(&body)?;
    let repository = RepoPath::parse(&payload.repository)?;

    debug!(
        delivery_id = %delivery_id,
        repository = %repository,
        reference = %payload.git_reference,
        "Received delete"
    );

    let event = DeleteEvent {
        repository,
        git_reference: GitReference::parse(payload.git_reference),
        actor_username: payload.username,
        installation_id: payload.installation_id,
        delivery_id,
    };
    app_state.engine().handle_delete(event).await;
    Ok(StatusCode::NO_CONTENT)
}

fn delivery_id(headers: &HeaderMap) -> Result<DeliveryId, IngressError> {
    headers
        .get(HEADER_DELIVERY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(DeliveryId::new)
        .ok_or(IngressError::MissingHeader(HEADER_DELIVERY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_payload_uses_camel_case() {
        let payload: PushPayload = serde_json::from_str(
            r#"{"repository":"org/repo","gitReference":"refs/tags/1.0","afterCommit":"abc"}"#,
        )
        .unwrap();
        assert_eq!(payload.git_reference, "refs/tags/1.0");
        assert_eq!(payload.after_commit.as_deref(), Some("abc"));
        assert!(payload.usernames.is_empty());
    }

    #[test]
    fn missing_delivery_header_is_reported() {
        let err = delivery_id(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, IngressError::MissingHeader(HEADER_DELIVERY)));
    }

    #[test]
    fn engine_errors_map_to_retry_status() {
        let retry = IngressError::Sync(SyncError::fatal("quota", true)).into_response();
        assert_eq!(retry.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let no_retry =
            IngressError::Sync(SyncError::ManifestUnreadable("bad".into())).into_response();
        assert_eq!(no_retry.status().as_u16(), 418);
    }
}
