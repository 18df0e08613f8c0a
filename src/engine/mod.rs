//! The webhook reconciliation engine.
//!
//! [`WebhookEngine`] is the entry point for push and delete notifications
//! forwarded by the delivery relay. It gates each notification for
//! staleness, then reconciles every affected unit in its own transaction and
//! records one audit event per unit.
//!
//! # Push lifecycle
//!
//! ```text
//! Received → Gated(ignored | admitted) → ManifestFetched
//!          → { per unit: Reconciling → Committed | TerminalFailure }*
//!          → Completed(fully successful | partially failed)
//! ```
//!
//! A fatal error (rate limit, backing-service outage, catalog failure) can
//! end the loop from any unit; the caller is told whether to retry.
//!
//! # Module layout
//!
//! - [`gate`]: staleness checks
//! - [`merge`]: version diff, merge and default election
//! - [`reconcile`]: per-unit entry reconciliation
//! - [`delete`]: version removal on reference deletion
//! - [`scope`]: transaction scopes
//! - [`error`]: per-unit and caller-facing errors

use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::config::SyncConfig;
use crate::index::{Indexer, TracingIndexer};
use crate::manifest::{DeclaredUnit, ManifestResolver, YamlManifestResolver};
use crate::source::{QuotaSnapshot, RemoteRepository, SourceControlClient};
use crate::store::{CatalogSession, CatalogStore};
use crate::types::{
    CommitHash, DeliveryId, EntryId, FileType, GitReference, MANIFEST_PATH, RepoPath, SourceFile,
    entry_path,
};

pub mod delete;
pub mod error;
pub mod gate;
pub mod merge;
pub mod reconcile;
pub mod scope;

#[cfg(test)]
mod tests;

pub use delete::{DeletionOutcome, DeletionReconciler};
pub use error::{ErrorClass, SyncError, UnitError};
pub use gate::{EventGate, GateDecision};
pub use merge::{MergeOptions, MergeOutcome, OpenDataChecker, PublicUrlChecker, VersionMerger};
pub use reconcile::{EntryReconciler, PublishAttempt, UnitContext, UnitOutcome, validate_unit};
pub use scope::{ScopeError, TransactionScope};

/// A push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub repository: RepoPath,
    pub git_reference: GitReference,
    /// Platform usernames; the first is the authenticated actor, the rest
    /// are other contributors to the push.
    pub actor_usernames: Vec<String>,
    pub installation_id: Option<u64>,
    pub delivery_id: DeliveryId,
    /// The commit the reference points at after the push, if the relay sent it.
    pub after_commit: Option<CommitHash>,
    /// Surface unit failures to the caller instead of only recording them.
    pub throw_if_not_successful: bool,
}

/// A reference deletion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEvent {
    pub repository: RepoPath,
    pub git_reference: GitReference,
    pub actor_username: Option<String>,
    pub installation_id: Option<u64>,
    pub delivery_id: DeliveryId,
}

/// A unit that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub entry_path: String,
    pub message: String,
}

/// What a push did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Why the push was ignored, if it was.
    pub ignored: Option<String>,
    /// Why the manifest could not be read, if it could not.
    pub manifest_error: Option<String>,
    /// Paths of the entries reconciled.
    pub reconciled: Vec<String>,
    /// Paths of the units excluded by their reference filters.
    pub filtered: Vec<String>,
    pub failed: Vec<UnitFailure>,
}

impl PushSummary {
    pub fn is_fully_successful(&self) -> bool {
        self.manifest_error.is_none() && self.failed.is_empty()
    }
}

/// What a delete did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub ignored: Option<String>,
    /// One outcome per manifest-managed entry of the repository.
    pub outcomes: Vec<DeletionOutcome>,
    /// Failures recorded to the audit trail.
    pub errors: Vec<String>,
}

/// Inputs shared by every unit of one push.
struct PushContext<'a> {
    event: &'a PushEvent,
    manifest_file: &'a SourceFile,
    remote: &'a RemoteRepository,
    contributors: &'a [String],
}

/// Orchestrates push and delete reconciliation.
pub struct WebhookEngine<S, C, A> {
    source: S,
    store: C,
    audit: A,
    indexer: Box<dyn Indexer>,
    resolver: Box<dyn ManifestResolver>,
    open_data: Option<Box<dyn OpenDataChecker>>,
    config: SyncConfig,
}

impl<S, C, A> WebhookEngine<S, C, A>
where
    S: SourceControlClient,
    C: CatalogStore,
    A: AuditSink,
{
    /// Creates an engine that parses YAML manifests and logs index
    /// notifications. The open-data check is enabled when the configuration
    /// lists public prefixes.
    pub fn new(source: S, store: C, audit: A, config: SyncConfig) -> Self {
        let open_data = if config.open_data_prefixes.is_empty() {
            None
        } else {
            Some(Box::new(PublicUrlChecker::new(config.open_data_prefixes.clone()))
                as Box<dyn OpenDataChecker>)
        };
        WebhookEngine {
            source,
            store,
            audit,
            indexer: Box::new(TracingIndexer),
            resolver: Box::new(YamlManifestResolver),
            open_data,
            config,
        }
    }

    pub fn with_indexer(mut self, indexer: impl Indexer + 'static) -> Self {
        self.indexer = Box::new(indexer);
        self
    }

    pub fn with_resolver(mut self, resolver: impl ManifestResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_open_data_checker(mut self, checker: impl OpenDataChecker + 'static) -> Self {
        self.open_data = Some(Box::new(checker));
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ─── Push ───

    /// Reconciles every unit the manifest at the pushed reference declares.
    ///
    /// Stale pushes are ignored. Per-unit failures are recorded and do not
    /// stop later units; they are returned as [`SyncError::Incomplete`] only
    /// when the event asks for it. Fatal failures stop processing and are
    /// always returned.
    #[instrument(
        skip_all,
        fields(
            repository = %event.repository,
            reference = %event.git_reference.full,
            delivery_id = %event.delivery_id
        )
    )]
    pub async fn handle_push(&self, event: PushEvent) -> Result<PushSummary, SyncError> {
        let repo = &event.repository;
        let reference = &event.git_reference;
        let mut summary = PushSummary::default();

        let before = self.quota_snapshot().await;
        if let Some(quota) = before.filter(QuotaSnapshot::is_exhausted) {
            let message = format!(
                "source control quota exhausted ({} requests used)",
                quota.used
            );
            self.record(push_audit(&event).failed(message.clone()))?;
            return Err(SyncError::fatal(message, true));
        }

        let decision = EventGate::new(&self.source)
            .check_push(repo, reference, event.after_commit.as_ref())
            .await;
        if let GateDecision::Stale(reason) = decision {
            info!(reason = %reason, "Ignoring stale push");
            self.record(push_audit(&event).ignored(reason.clone()))?;
            summary.ignored = Some(reason);
            return Ok(summary);
        }

        let raw = match self.source.fetch_manifest(repo, reference).await {
            Ok(raw) => raw,
            Err(e) if e.kind.is_retriable() => {
                self.record(push_audit(&event).failed(format!("could not fetch manifest: {}", e)))?;
                return Err(e.into());
            }
            Err(e) => {
                let message = format!("could not fetch {}: {}", MANIFEST_PATH, e.message);
                return self.manifest_unreadable(&event, summary, message);
            }
        };
        let manifest = match self.resolver.resolve(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                let message = format!("could not read {}: {}", MANIFEST_PATH, e);
                return self.manifest_unreadable(&event, summary, message);
            }
        };
        let manifest_file = SourceFile::new(
            FileType::Manifest,
            MANIFEST_PATH,
            MANIFEST_PATH,
            String::from_utf8_lossy(&raw),
        );

        let remote = match self.source.repository(repo).await {
            Ok(remote) => remote,
            Err(e) => {
                self.record(
                    push_audit(&event).failed(format!("could not read repository metadata: {}", e)),
                )?;
                return Err(e.into());
            }
        };
        let others = event.actor_usernames.get(1..).unwrap_or_default();
        let contributors = self.contributors_with_access(repo, others).await;
        let ctx = PushContext {
            event: &event,
            manifest_file: &manifest_file,
            remote: &remote,
            contributors: &contributors,
        };

        let mut fatal = None;
        for unit in &manifest.units {
            let path = entry_path(&self.config.source_host, repo, unit.name());
            if !unit.settings().filters.accepts(reference) {
                debug!(unit = %unit.label(), "Unit filters exclude reference");
                self.record(push_audit(&event).with_entry(&path).ignored(format!(
                    "{} does not apply to {}",
                    unit.label(),
                    reference.full
                )))?;
                summary.filtered.push(path);
                continue;
            }

            match self.reconcile_unit(unit, &ctx).await {
                Ok(outcome) => {
                    self.record(
                        push_audit(&event)
                            .with_entry(&outcome.entry_path)
                            .succeeded(outcome.summary()),
                    )?;
                    if let Some(attempt) = &outcome.publish {
                        let record = AuditEvent::new(
                            AuditEventType::Publish,
                            repo.to_string(),
                            &reference.full,
                            event.delivery_id.as_str(),
                        )
                        .with_actor(event.actor_usernames.first().cloned())
                        .with_entry(&outcome.entry_path);
                        self.record(if attempt.success {
                            record.succeeded(&attempt.message)
                        } else {
                            record.failed(&attempt.message)
                        })?;
                    }
                    for notice in &outcome.notices {
                        self.indexer.on_entry_changed(&notice.entry, notice.mode);
                    }
                    summary.reconciled.push(outcome.entry_path);
                }
                Err(e) => {
                    let message = format!("{}: {}", unit.label(), e);
                    self.record(push_audit(&event).with_entry(&path).failed(message.clone()))?;
                    match e.class() {
                        ErrorClass::PerUnitTerminal => {
                            warn!(entry = %path, error = %e, "Unit failed");
                            summary.failed.push(UnitFailure {
                                entry_path: path,
                                message,
                            });
                        }
                        ErrorClass::Fatal { retryable } => {
                            error!(entry = %path, error = %e, retryable, "Aborting push");
                            fatal = Some(SyncError::fatal(message, retryable));
                            break;
                        }
                    }
                }
            }
        }

        self.release_report(before).await;

        if let Some(e) = fatal {
            return Err(e);
        }
        if !summary.failed.is_empty() && event.throw_if_not_successful {
            return Err(SyncError::Incomplete {
                failed: summary.failed.len(),
                total: manifest.units.len(),
            });
        }
        Ok(summary)
    }

    /// Checks the unit's shape, fetches its version, then reconciles it in one transaction and
    /// finishes it in a second.
    async fn reconcile_unit(
        &self,
        unit: &DeclaredUnit,
        ctx: &PushContext<'_>,
    ) -> Result<UnitOutcome, UnitError> {
        let event = ctx.event;
        validate_unit(unit)?;
        let remote_version = self
            .source
            .materialize_version(&event.repository, &event.git_reference, unit)
            .await?;

        let open_data = self
            .open_data
            .as_ref()
            .map(|checker| checker.as_ref() as &dyn OpenDataChecker);
        let merger = VersionMerger::new(self.config.limits, open_data);
        let reconciler = EntryReconciler::new(merger, &self.config.source_host);
        let scope = TransactionScope::new(&self.store);

        let reconciled = scope
            .run(|session| {
                reconciler.reconcile(
                    session,
                    UnitContext {
                        unit,
                        repository: &event.repository,
                        reference: &event.git_reference,
                        manifest_file: ctx.manifest_file,
                        remote: ctx.remote,
                        remote_version,
                        actor: event.actor_usernames.first().map(String::as_str),
                        contributors: ctx.contributors,
                    },
                )
            })
            .map_err(unscoped)?;

        let mut continued = scope.continue_session()?;
        continued
            .run(|session| reconciler.finish(session, reconciled, unit.settings()))
            .map_err(unscoped)
    }

    fn manifest_unreadable(
        &self,
        event: &PushEvent,
        mut summary: PushSummary,
        message: String,
    ) -> Result<PushSummary, SyncError> {
        warn!(error = %message, "Manifest unreadable");
        self.record(push_audit(event).failed(message.clone()))?;
        if event.throw_if_not_successful {
            return Err(SyncError::ManifestUnreadable(message));
        }
        summary.manifest_error = Some(message);
        Ok(summary)
    }

    /// Keeps the contributors that currently have access to `repo`.
    async fn contributors_with_access(&self, repo: &RepoPath, usernames: &[String]) -> Vec<String> {
        let mut kept = Vec::new();
        for username in usernames {
            match self.source.has_access(repo, username).await {
                Ok(true) => kept.push(username.clone()),
                Ok(false) => debug!(username = %username, "Contributor has no access"),
                Err(e) => warn!(username = %username, error = %e, "Could not check contributor access"),
            }
        }
        kept
    }

    async fn quota_snapshot(&self) -> Option<QuotaSnapshot> {
        match self.source.quota_snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Could not read source control quota");
                None
            }
        }
    }

    /// Logs how much quota the push consumed.
    async fn release_report(&self, before: Option<QuotaSnapshot>) {
        let after = self.quota_snapshot().await;
        match (before, after) {
            (Some(before), Some(after)) => info!(
                used = after.used.saturating_sub(before.used),
                remaining = after.remaining,
                "Source control quota consumed"
            ),
            (_, Some(after)) => info!(remaining = after.remaining, "Source control quota"),
            _ => {}
        }
    }

    fn record(&self, event: AuditEvent) -> Result<(), SyncError> {
        self.audit.record(event).map_err(SyncError::from)
    }

    // ─── Delete ───

    /// Removes the deleted reference's versions from every manifest-managed
    /// entry of the repository.
    ///
    /// Never fails: every problem is recorded to the audit trail.
    #[instrument(
        skip_all,
        fields(
            repository = %event.repository,
            reference = %event.git_reference.full,
            delivery_id = %event.delivery_id
        )
    )]
    pub async fn handle_delete(&self, event: DeleteEvent) -> DeleteSummary {
        let repo = &event.repository;
        let reference = &event.git_reference;
        let mut summary = DeleteSummary::default();

        if !reference.is_branch_or_tag() {
            let message = format!("{} is not a branch or tag", reference.full);
            warn!("{}", message);
            self.record_or_log(delete_audit(&event).failed(message.clone()));
            summary.errors.push(message);
            return summary;
        }

        let decision = EventGate::new(&self.source).check_delete(repo, reference).await;
        if let GateDecision::Stale(reason) = decision {
            info!(reason = %reason, "Ignoring stale delete");
            self.record_or_log(delete_audit(&event).ignored(reason.clone()));
            summary.ignored = Some(reason);
            return summary;
        }

        let scope = TransactionScope::new(&self.store);
        let targets: Vec<(EntryId, String)> = match scope.run(|session| {
            session.find_manifest_entries(repo).map(|entries| {
                entries
                    .into_iter()
                    .map(|entry| (entry.id, entry.path))
                    .collect()
            })
        }) {
            Ok(targets) => targets,
            Err(e) => {
                let message = format!("could not load entries of {}: {}", repo, e);
                error!("{}", message);
                self.record_or_log(delete_audit(&event).failed(message.clone()));
                summary.errors.push(message);
                return summary;
            }
        };
        debug!(entries = targets.len(), "Deleting versions");

        for (entry_id, path) in targets {
            let result = scope.run(|session| {
                DeletionReconciler.reconcile(session, entry_id, &reference.name)
            });
            match result {
                Ok(outcome) => {
                    self.report_deletion(&event, &outcome, &mut summary);
                    summary.outcomes.push(outcome);
                }
                Err(e) => {
                    let message = format!("could not delete {} from {}: {}", reference.name, path, e);
                    error!(entry = %path, error = %e, "Deletion failed");
                    self.record_or_log(delete_audit(&event).with_entry(&path).failed(message.clone()));
                    summary.errors.push(message);
                }
            }
        }
        summary
    }

    fn report_deletion(&self, event: &DeleteEvent, outcome: &DeletionOutcome, summary: &mut DeleteSummary) {
        let name = &event.git_reference.name;
        match outcome {
            DeletionOutcome::Applied {
                entry_path, notice, ..
            } => {
                self.record_or_log(
                    delete_audit(event)
                        .with_entry(entry_path)
                        .succeeded(format!("deleted version {} of {}", name, entry_path)),
                );
                self.indexer.on_entry_changed(&notice.entry, notice.mode);
            }
            DeletionOutcome::FrozenOnly { entry_path } => {
                let message = format!("cannot delete frozen version {} of {}", name, entry_path);
                self.record_or_log(delete_audit(event).with_entry(entry_path).failed(message.clone()));
                summary.errors.push(message);
            }
            DeletionOutcome::Archived { entry_path } => {
                let message = format!("{} is archived; version {} was not deleted", entry_path, name);
                self.record_or_log(delete_audit(event).with_entry(entry_path).failed(message.clone()));
                summary.errors.push(message);
            }
            DeletionOutcome::Vanished | DeletionOutcome::Unaffected => {}
        }
    }

    fn record_or_log(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            error!(error = %e, "Failed to record audit event");
        }
    }
}

fn unscoped(e: ScopeError<UnitError>) -> UnitError {
    match e {
        ScopeError::Infrastructure(store) => UnitError::Store(store),
        ScopeError::Work(work) => work,
    }
}

fn push_audit(event: &PushEvent) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::Push,
        event.repository.to_string(),
        &event.git_reference.full,
        event.delivery_id.as_str(),
    )
    .with_actor(event.actor_usernames.first().cloned())
}

fn delete_audit(event: &DeleteEvent) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::Delete,
        event.repository.to_string(),
        &event.git_reference.full,
        event.delivery_id.as_str(),
    )
    .with_actor(event.actor_username.clone())
}
