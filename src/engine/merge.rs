//! Merging a freshly materialized version into the stored one.
//!
//! Source files are diffed by `(file_type, absolute_path)`: files in both
//! are updated in place, remote-only files are added, stored-only files are
//! removed. Validations are upserted by file type and never removed here.
//! Merging is convergent: merging the same remote version twice leaves the
//! same stored version as merging it once.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::VersionLimits;
use crate::manifest::ManifestAuthor;
use crate::types::{
    Entry, FileKey, FileType, GitReference, ReferenceType, SourceFile, Version,
};

use super::error::UnitError;

/// Decides whether a version's test data is publicly accessible.
pub trait OpenDataChecker: Send + Sync {
    fn has_open_data(&self, version: &Version, descriptor_language: &str) -> bool;
}

/// Treats test data as open when every URL-like value in the test parameter
/// files starts with one of the configured public prefixes.
#[derive(Debug, Clone, Default)]
pub struct PublicUrlChecker {
    prefixes: Vec<String>,
}

impl PublicUrlChecker {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    fn is_public(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
    }
}

impl OpenDataChecker for PublicUrlChecker {
    fn has_open_data(&self, version: &Version, _descriptor_language: &str) -> bool {
        let urls: Vec<&str> = version
            .source_files
            .iter()
            .filter(|f| f.file_type == FileType::TestParameter)
            .flat_map(|f| f.content.split(|c: char| c.is_whitespace() || c == '"' || c == '\''))
            .filter(|token| token.contains("://"))
            .collect();
        !urls.is_empty() && urls.iter().all(|url| self.is_public(url))
    }
}

/// Per-unit merge settings.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions<'a> {
    pub reference: &'a GitReference,
    pub descriptor_language: &'a str,
    pub manifest_authors: &'a [ManifestAuthor],
    pub latest_tag_as_default: bool,
    /// Name of the repository's default branch.
    pub remote_default_branch: &'a str,
}

/// What a merge did to the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub version_name: String,
    pub created: bool,
    /// The stored version was frozen; nothing was changed.
    pub frozen_skipped: bool,
    /// The version was elected default by this merge.
    pub became_default: bool,
}

/// Merges remote versions into entries.
pub struct VersionMerger<'a> {
    limits: VersionLimits,
    open_data: Option<&'a dyn OpenDataChecker>,
}

impl<'a> VersionMerger<'a> {
    pub fn new(limits: VersionLimits, open_data: Option<&'a dyn OpenDataChecker>) -> Self {
        Self { limits, open_data }
    }

    /// Merges `remote` into `existing`.
    ///
    /// A frozen `existing` version is returned unchanged.
    pub fn merge(
        &self,
        existing: Option<&Version>,
        remote: Version,
        options: &MergeOptions<'_>,
    ) -> Version {
        let mut merged = match existing {
            None => {
                let mut adopted = remote;
                adopted.reference_type = ReferenceType::from_ref(&options.reference.full);
                adopted
            }
            Some(stored) if stored.frozen => return stored.clone(),
            Some(stored) => merge_into(stored.clone(), remote),
        };

        apply_manifest_authors(&mut merged, options.manifest_authors);
        if let Some(checker) = self.open_data {
            merged.has_open_data = checker.has_open_data(&merged, options.descriptor_language);
        }
        merged.refresh_verification();
        merged
    }

    /// Merges `remote` into `entry`, checks limits and applies the default
    /// version election.
    pub fn apply(
        &self,
        entry: &mut Entry,
        remote: Version,
        options: &MergeOptions<'_>,
    ) -> Result<MergeOutcome, UnitError> {
        let version_name = remote.name.clone();
        let existing = entry.version(&version_name);
        let created = existing.is_none();

        if existing.is_some_and(|v| v.frozen) {
            debug!(entry = %entry.path, version = %version_name, "Version is frozen, skipping merge");
            return Ok(MergeOutcome {
                version_name,
                created: false,
                frozen_skipped: true,
                became_default: false,
            });
        }

        let merged = self.merge(existing, remote, options);
        let version_count = entry.versions.len() + usize::from(created);
        self.check_limits(entry, &merged, version_count)?;

        let elect = should_elect(entry, &merged, options);
        match entry.version_mut(&version_name) {
            Some(slot) => *slot = merged,
            None => entry.versions.push(merged),
        }

        let became_default = elect && entry.default_version.as_deref() != Some(version_name.as_str());
        if elect {
            entry.default_version = Some(version_name.clone());
        }
        entry.refresh_aggregates();

        Ok(MergeOutcome {
            version_name,
            created,
            frozen_skipped: false,
            became_default,
        })
    }

    fn check_limits(
        &self,
        entry: &Entry,
        version: &Version,
        version_count: usize,
    ) -> Result<(), UnitError> {
        let exceeded = |reason: String| UnitError::LimitExceeded {
            path: entry.path.clone(),
            version: version.name.clone(),
            reason,
        };

        if version_count > self.limits.max_versions_per_entry {
            return Err(exceeded(format!(
                "{} versions, at most {} allowed",
                version_count, self.limits.max_versions_per_entry
            )));
        }
        if version.source_files.len() > self.limits.max_source_files {
            return Err(exceeded(format!(
                "{} files, at most {} allowed",
                version.source_files.len(),
                self.limits.max_source_files
            )));
        }
        if let Some(file) = version
            .source_files
            .iter()
            .find(|f| f.content.len() > self.limits.max_file_bytes)
        {
            return Err(exceeded(format!(
                "{} is {} bytes, at most {} allowed",
                file.absolute_path,
                file.content.len(),
                self.limits.max_file_bytes
            )));
        }
        Ok(())
    }
}

/// Field-by-field merge of a remote version into a stored, unfrozen one.
fn merge_into(mut stored: Version, remote: Version) -> Version {
    stored.workflow_path = remote.workflow_path;
    stored.last_modified = remote.last_modified;
    stored.legacy_version = remote.legacy_version;
    stored.aliases = remote.aliases;
    stored.commit_id = remote.commit_id;
    stored.reference_type = remote.reference_type;
    stored.valid = remote.valid;
    stored.authors = remote.authors;
    stored.orcid_authors = remote.orcid_authors;
    stored.engine_versions = remote.engine_versions;
    stored.descriptor_type_versions = remote.descriptor_type_versions;
    stored.file_formats = remote.file_formats;
    if remote.description.is_some() {
        stored.description = remote.description;
    }
    stored.dag_json = None;
    stored.tool_table_json = None;

    if merge_files(&mut stored.source_files, remote.source_files) {
        stored.summary_stale = true;
    }
    for validation in remote.validations {
        stored.add_or_update_validation(validation);
    }
    stored
}

/// Diffs `stored` against `remote` in place. Returns true if the primary
/// descriptor's content changed.
fn merge_files(stored: &mut Vec<SourceFile>, remote: Vec<SourceFile>) -> bool {
    let mut remote_by_key: BTreeMap<FileKey, SourceFile> =
        remote.into_iter().map(|f| (f.key(), f)).collect();
    let mut primary_changed = false;

    stored.retain_mut(|file| match remote_by_key.remove(&file.key()) {
        Some(incoming) => {
            if file.content != incoming.content {
                primary_changed |= file.file_type == FileType::PrimaryDescriptor;
                file.set_content(incoming.content);
            }
            file.path = incoming.path;
            true
        }
        None => false,
    });
    stored.extend(remote_by_key.into_values());
    primary_changed
}

/// Manifest-declared authors replace descriptor authors when any are declared.
fn apply_manifest_authors(version: &mut Version, declared: &[ManifestAuthor]) {
    if declared.is_empty() {
        return;
    }
    version.orcid_authors = declared.iter().filter_map(|a| a.orcid.clone()).collect();
    version.authors = declared
        .iter()
        .filter(|a| a.orcid.is_none())
        .filter_map(ManifestAuthor::to_author)
        .collect();
}

fn should_elect(entry: &Entry, version: &Version, options: &MergeOptions<'_>) -> bool {
    let current = entry.default_version();
    if options.latest_tag_as_default {
        version.reference_type == ReferenceType::Tag
            && current.is_none_or(|d| d.name == version.name || version.last_modified > d.last_modified)
    } else {
        current.is_none()
            && version.reference_type == ReferenceType::Branch
            && version.name == options.remote_default_branch
    }
}
