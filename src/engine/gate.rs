//! Admission of push and delete notifications.
//!
//! Deliveries arrive at least once and possibly out of order. The gate
//! compares what a notification claims against the reference's current
//! state and turns away notifications that a later one will supersede.
//! When the current state cannot be determined the gate admits.

use tracing::{debug, warn};

use crate::source::SourceControlClient;
use crate::types::{CommitHash, GitReference, RepoPath};

/// Whether a notification should be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    /// The notification no longer reflects the repository; the reason is
    /// recorded on the ignored audit event.
    Stale(String),
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Admit)
    }
}

/// Staleness checks against source control.
pub struct EventGate<'a, S: SourceControlClient> {
    source: &'a S,
}

impl<'a, S: SourceControlClient> EventGate<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// A push is processed iff `after_commit` is absent or equals the
    /// reference's current hash.
    pub async fn check_push(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
        after_commit: Option<&CommitHash>,
    ) -> GateDecision {
        let Some(after) = after_commit else {
            debug!(repository = %repo, reference = %reference.full, "No after-commit, admitting push");
            return GateDecision::Admit;
        };

        let current = match self.source.current_hash(repo, reference).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(
                    repository = %repo,
                    reference = %reference.full,
                    error = %e,
                    "Could not determine current hash, admitting push"
                );
                return GateDecision::Admit;
            }
        };

        match current {
            Some(current) if current == *after => GateDecision::Admit,
            Some(current) => GateDecision::Stale(format!(
                "{} has moved on from {} to {}; a later delivery supersedes this one",
                reference.full,
                after.short(),
                current.short()
            )),
            None => GateDecision::Stale(format!(
                "{} no longer exists; a later delivery supersedes this one",
                reference.full
            )),
        }
    }

    /// A delete is processed iff the reference no longer exists.
    pub async fn check_delete(&self, repo: &RepoPath, reference: &GitReference) -> GateDecision {
        match self.source.current_hash(repo, reference).await {
            Ok(None) => GateDecision::Admit,
            Err(e) if e.is_not_found() => GateDecision::Admit,
            Ok(Some(current)) => GateDecision::Stale(format!(
                "{} still exists at {}; ignoring delete",
                reference.full,
                current.short()
            )),
            Err(e) => {
                warn!(
                    repository = %repo,
                    reference = %reference.full,
                    error = %e,
                    "Could not determine whether reference exists, admitting delete"
                );
                GateDecision::Admit
            }
        }
    }
}
