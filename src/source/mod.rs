//! Source control seam.
//!
//! The engine only reads from source control: it asks for a reference's
//! current hash, the manifest file, the materialized files of a version, and
//! repository metadata. [`SourceControlClient`] is the trait at that seam;
//! [`crate::github::GitHubSourceControl`] implements it against the GitHub
//! API and tests use a scripted fake.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::manifest::DeclaredUnit;
use crate::types::{CommitHash, GitReference, RepoPath, Version};

mod error;

pub use error::{SourceControlError, SourceErrorKind};

/// Result type for source control operations.
pub type Result<T> = std::result::Result<T, SourceControlError>;

/// Repository-level metadata used to seed and refresh entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub default_branch: String,
    pub description: Option<String>,
    /// Clone URL recorded on the entry (`git@github.com:owner/repo.git`).
    pub git_url: String,
    pub topic: Option<String>,
}

/// API quota consumption at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub used: u64,
    pub remaining: u64,
}

impl QuotaSnapshot {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Read access to a remote git hosting platform.
///
/// Implementations are shared across deliveries, so every method takes
/// `&self`.
pub trait SourceControlClient: Send + Sync {
    /// Returns the current hash of `reference`, or `None` if it does not exist.
    ///
    /// For annotated tags this is the tag object hash; for branches and
    /// lightweight tags it is the commit hash.
    fn current_hash(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
    ) -> impl Future<Output = Result<Option<CommitHash>>> + Send;

    /// Fetches the raw manifest file at `reference`.
    fn fetch_manifest(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Fetches the files of `unit` at `reference` and returns them as an
    /// unsaved version named after the reference.
    fn materialize_version(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
        unit: &DeclaredUnit,
    ) -> impl Future<Output = Result<Version>> + Send;

    /// Fetches repository metadata, including the default branch.
    fn repository(&self, repo: &RepoPath) -> impl Future<Output = Result<RemoteRepository>> + Send;

    /// Returns true if `username` currently has access to `repo`.
    fn has_access(
        &self,
        repo: &RepoPath,
        username: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Reports current API quota consumption.
    fn quota_snapshot(&self) -> impl Future<Output = Result<QuotaSnapshot>> + Send;
}
