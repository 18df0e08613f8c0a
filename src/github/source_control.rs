//! [`SourceControlClient`] implementation over the GitHub REST API.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::client::GitHubClient;
use super::retry::{RetryConfig, retry_with_backoff};
use crate::manifest::DeclaredUnit;
use crate::source::{
    QuotaSnapshot, RemoteRepository, Result, SourceControlClient, SourceControlError,
};
use crate::types::{
    CommitHash, FileType, GitReference, MANIFEST_PATH, ReferenceType, RepoPath, SourceFile,
    Validation, Version,
};

/// Reads repositories, references and files from GitHub.
#[derive(Debug, Clone)]
pub struct GitHubSourceControl {
    client: GitHubClient,
    retry: RetryConfig,
}

impl GitHubSourceControl {
    pub fn new(client: GitHubClient, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Fetches one file at `reference`. Returns `None` if it does not exist.
    async fn fetch_file(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
        absolute_path: &str,
    ) -> Result<Option<String>> {
        let route = contents_route(repo, reference, absolute_path);
        let fetched = retry_with_backoff(self.retry, || {
            self.client.get_json::<ContentsResponse>(&route)
        })
        .await;

        match fetched {
            Ok(contents) => {
                let bytes = contents.decode()?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    SourceControlError::permanent(format!("{} is not UTF-8 text", absolute_path))
                })?;
                Ok(Some(text))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetches a declared file into `version`, recording a validation for its
    /// file type. Returns false if the file is missing.
    async fn collect_file(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
        version: &mut Version,
        file_type: FileType,
        declared_path: &str,
    ) -> Result<bool> {
        let absolute_path = absolutize(declared_path);
        match self.fetch_file(repo, reference, &absolute_path).await? {
            Some(content) => {
                version.source_files.push(SourceFile::new(
                    file_type,
                    declared_path,
                    absolute_path,
                    content,
                ));
                Ok(true)
            }
            None => {
                version.add_or_update_validation(Validation::new(
                    file_type,
                    false,
                    Some(format!("{} was not found at {}", absolute_path, reference.name)),
                ));
                Ok(false)
            }
        }
    }
}

impl SourceControlClient for GitHubSourceControl {
    #[instrument(skip(self), fields(repository = %repo, reference = %reference))]
    async fn current_hash(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
    ) -> Result<Option<CommitHash>> {
        let namespace = match reference.reference_type {
            ReferenceType::Branch => "heads",
            ReferenceType::Tag => "tags",
            ReferenceType::NotApplicable => return Ok(None),
        };
        let route = format!(
            "/repos/{}/{}/git/ref/{}/{}",
            repo.owner,
            repo.repo,
            namespace,
            encode_path(&reference.name)
        );

        let fetched =
            retry_with_backoff(self.retry, || self.client.get_json::<RefResponse>(&route)).await;
        match fetched {
            Ok(found) => Ok(Some(CommitHash::new(found.object.sha))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(repository = %repo, reference = %reference))]
    async fn fetch_manifest(&self, repo: &RepoPath, reference: &GitReference) -> Result<Vec<u8>> {
        let route = contents_route(repo, reference, MANIFEST_PATH);
        let contents = retry_with_backoff(self.retry, || {
            self.client.get_json::<ContentsResponse>(&route)
        })
        .await?;
        contents.decode()
    }

    #[instrument(skip(self, unit), fields(repository = %repo, reference = %reference, unit = %unit.label()))]
    async fn materialize_version(
        &self,
        repo: &RepoPath,
        reference: &GitReference,
        unit: &DeclaredUnit,
    ) -> Result<Version> {
        let commit_route = format!(
            "/repos/{}/{}/commits/{}",
            repo.owner,
            repo.repo,
            urlencoding::encode(&reference.full)
        );
        let commit = retry_with_backoff(self.retry, || {
            self.client.get_json::<CommitResponse>(&commit_route)
        })
        .await?;

        let mut version = Version::new(reference.name.clone(), reference.reference_type);
        version.commit_id = Some(CommitHash::new(commit.sha));
        if let Some(date) = commit.commit.committer.and_then(|c| c.date) {
            version.last_modified = date;
        }

        let settings = unit.settings();
        let descriptor_found = match (&settings.primary_descriptor_path, unit) {
            (_, DeclaredUnit::Service { .. }) | (None, _) => {
                version.workflow_path = MANIFEST_PATH.to_string();
                true
            }
            (Some(path), _) => {
                version.workflow_path = absolutize(path);
                let found = self
                    .collect_file(repo, reference, &mut version, FileType::PrimaryDescriptor, path)
                    .await?;
                if found {
                    version.add_or_update_validation(Validation::new(
                        FileType::PrimaryDescriptor,
                        true,
                        None,
                    ));
                }
                found
            }
        };

        let mut parameters_found = true;
        for path in &settings.test_parameter_files {
            parameters_found &= self
                .collect_file(repo, reference, &mut version, FileType::TestParameter, path)
                .await?;
        }
        if parameters_found && !settings.test_parameter_files.is_empty() {
            version.add_or_update_validation(Validation::new(FileType::TestParameter, true, None));
        }

        if let Some(path) = &settings.readme_path {
            self.collect_file(repo, reference, &mut version, FileType::Readme, path)
                .await?;
        }
        for path in &settings.files {
            self.collect_file(repo, reference, &mut version, FileType::Other, path)
                .await?;
        }

        version.valid = descriptor_found;
        debug!(
            files = version.source_files.len(),
            valid = version.valid,
            "Materialized version"
        );
        Ok(version)
    }

    #[instrument(skip(self), fields(repository = %repo))]
    async fn repository(&self, repo: &RepoPath) -> Result<RemoteRepository> {
        let route = format!("/repos/{}/{}", repo.owner, repo.repo);
        let found =
            retry_with_backoff(self.retry, || self.client.get_json::<RepoResponse>(&route)).await?;
        Ok(RemoteRepository {
            default_branch: found.default_branch,
            topic: found.description.clone(),
            description: found.description,
            git_url: found
                .ssh_url
                .unwrap_or_else(|| format!("git@github.com:{}.git", repo)),
        })
    }

    #[instrument(skip(self), fields(repository = %repo))]
    async fn has_access(&self, repo: &RepoPath, username: &str) -> Result<bool> {
        let route = format!(
            "/repos/{}/{}/collaborators/{}",
            repo.owner,
            repo.repo,
            urlencoding::encode(username)
        );
        let status = retry_with_backoff(self.retry, || self.client.get_status(&route)).await?;
        Ok(status == 204)
    }

    async fn quota_snapshot(&self) -> Result<QuotaSnapshot> {
        let limits = retry_with_backoff(self.retry, || {
            self.client.get_json::<RateLimitResponse>("/rate_limit")
        })
        .await?;
        Ok(QuotaSnapshot {
            used: limits.resources.core.used,
            remaining: limits.resources.core.remaining,
        })
    }
}

// ─── Routes ───────────────────────────────────────────────────────────────────

/// Makes a declared path absolute within the repository.
fn absolutize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Percent-encodes each segment of a slash-separated path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn contents_route(repo: &RepoPath, reference: &GitReference, absolute_path: &str) -> String {
    format!(
        "/repos/{}/{}/contents/{}?ref={}",
        repo.owner,
        repo.repo,
        encode_path(absolute_path.trim_start_matches('/')),
        urlencoding::encode(&reference.full)
    )
}

// ─── Response shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl ContentsResponse {
    fn decode(&self) -> Result<Vec<u8>> {
        let content = self
            .content
            .as_deref()
            .ok_or_else(|| SourceControlError::permanent("contents response carries no content"))?;
        match self.encoding.as_deref() {
            Some("base64") | None => {
                let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD.decode(compact).map_err(|e| {
                    SourceControlError::permanent(format!("invalid base64 content: {}", e))
                })
            }
            Some(other) => Err(SourceControlError::permanent(format!(
                "unsupported content encoding {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
    description: Option<String>,
    ssh_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitBucket,
}

#[derive(Debug, Deserialize)]
struct RateLimitBucket {
    used: u64,
    remaining: u64,
}
