//! HTTP ingress for relayed webhook notifications.
//!
//! The delivery relay authenticates GitHub deliveries and forwards push and
//! delete notifications here. Handlers translate them into engine events and
//! map the engine's outcome onto a status code the relay acts on.
//!
//! # Endpoints
//!
//! - `POST /lambdaEvents/push` - Reconciles a push (200, or the retry status
//!   of the failure)
//! - `POST /lambdaEvents/delete` - Reconciles a reference deletion (204)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use crate::audit::AuditSink;
use crate::engine::WebhookEngine;
use crate::source::SourceControlClient;
use crate::store::CatalogStore;

pub mod health;
pub mod lambda;

pub use health::health_handler;
pub use lambda::{delete_handler, push_handler};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<S, C, A> {
    engine: Arc<WebhookEngine<S, C, A>>,
}

// Not derived: a derive would require the engine's collaborators to be Clone.
impl<S, C, A> Clone for AppState<S, C, A> {
    fn clone(&self) -> Self {
        AppState {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S, C, A> AppState<S, C, A> {
    pub fn new(engine: WebhookEngine<S, C, A>) -> Self {
        AppState {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &WebhookEngine<S, C, A> {
        &self.engine
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S, C, A>(app_state: AppState<S, C, A>) -> axum::Router
where
    S: SourceControlClient + 'static,
    C: CatalogStore + 'static,
    A: AuditSink + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/lambdaEvents/push", post(push_handler::<S, C, A>))
        .route("/lambdaEvents/delete", post(delete_handler::<S, C, A>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::audit::MemoryAuditSink;
    use crate::config::SyncConfig;
    use crate::source::SourceControlError;
    use crate::store::MemoryCatalog;
    use crate::test_utils::{FakeSourceControl, workflows_manifest};
    use crate::types::GitReference;

    type TestState = AppState<FakeSourceControl, MemoryCatalog, MemoryAuditSink>;

    fn test_app_state() -> TestState {
        let catalog = MemoryCatalog::new();
        catalog.register_user("alice").unwrap();
        let source = FakeSourceControl::new();
        source.set_manifest(&workflows_manifest(&["align"]));
        source.set_hash(&GitReference::parse("refs/heads/main"), "abc1234");
        AppState::new(WebhookEngine::new(
            source,
            catalog,
            MemoryAuditSink::new(),
            SyncConfig::default(),
        ))
    }

    fn post_json(uri: &str, delivery_id: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(id) = delivery_id {
            builder = builder.header("x-github-delivery", id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn push_body(after_commit: &str) -> serde_json::Value {
        serde_json::json!({
            "repository": "org/repo",
            "gitReference": "refs/heads/main",
            "usernames": ["alice"],
            "installationId": 42,
            "afterCommit": after_commit,
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_app_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn push_reconciles_and_reports() {
        let state = test_app_state();
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json("/lambdaEvents/push", Some("d-1"), push_body("abc1234")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["reconciled"], serde_json::json!(["github.com/org/repo/align"]));
        assert_eq!(state.engine().store().entries().unwrap().len(), 1);
        assert_eq!(state.engine().audit().events()[0].delivery_id, "d-1");
    }

    #[tokio::test]
    async fn stale_push_is_accepted_and_ignored() {
        let state = test_app_state();
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json("/lambdaEvents/push", Some("d-1"), push_body("0000000")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["ignored"].is_string());
        assert!(state.engine().store().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_returns_500() {
        let state = test_app_state();
        state.engine().source().set_quota(5000, 0);
        let app = build_router(state);

        let response = app
            .oneshot(post_json("/lambdaEvents/push", Some("d-1"), push_body("abc1234")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["retry"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn unit_failure_returns_418() {
        let state = test_app_state();
        state
            .engine()
            .source()
            .fail_unit("align", SourceControlError::permanent("bad descriptor"));
        let app = build_router(state);

        let response = app
            .oneshot(post_json("/lambdaEvents/push", Some("d-1"), push_body("abc1234")))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 418);
        let body = body_json(response).await;
        assert_eq!(body["retry"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn push_without_delivery_header_is_rejected() {
        let app = build_router(test_app_state());
        let response = app
            .oneshot(post_json("/lambdaEvents/push", None, push_body("abc1234")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_repository_is_rejected() {
        let app = build_router(test_app_state());
        let mut body = push_body("abc1234");
        body["repository"] = serde_json::json!("not-a-repo");
        let response = app
            .oneshot(post_json("/lambdaEvents/push", Some("d-1"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_always_answers_no_content() {
        let state = test_app_state();
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/lambdaEvents/delete",
                Some("d-2"),
                serde_json::json!({
                    "repository": "org/repo",
                    "gitReference": "refs/pull/1/head",
                    "username": "alice",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let events = state.engine().audit().events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
    }
}
