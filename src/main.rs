use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registry_sync::audit::JsonlAuditLog;
use registry_sync::config::SyncConfig;
use registry_sync::engine::WebhookEngine;
use registry_sync::github::{GitHubClient, GitHubSourceControl};
use registry_sync::index::TracingIndexer;
use registry_sync::server::{AppState, build_router};
use registry_sync::store::MemoryCatalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registry_sync=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env().context("loading configuration")?;

    let client = match &config.github_token {
        Some(token) => GitHubClient::from_token(token.clone()),
        None => {
            tracing::warn!("No GitHub token configured; using anonymous access");
            GitHubClient::anonymous()
        }
    }
    .context("building GitHub client")?;
    let source = GitHubSourceControl::new(client, config.retry_config());

    let audit = JsonlAuditLog::open(&config.audit_log_path)
        .with_context(|| format!("opening audit log {}", config.audit_log_path.display()))?;

    let addr = config.listen_addr;
    let engine = WebhookEngine::new(source, MemoryCatalog::new(), audit, config)
        .with_indexer(TracingIndexer);
    let app = build_router(AppState::new(engine));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        signal.cancel();
    });

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serving HTTP")?;
    Ok(())
}
