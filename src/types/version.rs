//! Versions and the files that belong to them.
//!
//! A version is one git reference's materialized state. Its source files are
//! keyed by `(file_type, absolute_path)`; that key is unique within a version.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ids::CommitHash;
use super::reference::ReferenceType;

/// The role a file plays within a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    PrimaryDescriptor,
    SecondaryDescriptor,
    TestParameter,
    /// The `.dockstore.yml` manifest the version was declared in.
    Manifest,
    Readme,
    Other,
}

/// Identity of a source file within a version.
pub type FileKey = (FileType, String);

/// Returns the lowercase hex SHA-256 of `content`.
pub fn content_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// One file belonging to a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path as declared (may be relative to the primary descriptor).
    pub path: String,
    /// Absolute path within the repository.
    pub absolute_path: String,
    pub content: String,
    pub file_type: FileType,
    /// SHA-256 of `content`, kept in step with it by [`SourceFile::set_content`].
    pub checksum: String,
    /// Platforms that have verified this file.
    #[serde(default)]
    pub verified_by: BTreeSet<String>,
}

impl SourceFile {
    pub fn new(
        file_type: FileType,
        path: impl Into<String>,
        absolute_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        SourceFile {
            path: path.into(),
            absolute_path: absolute_path.into(),
            checksum: content_checksum(&content),
            content,
            file_type,
            verified_by: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> FileKey {
        (self.file_type, self.absolute_path.clone())
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.checksum = content_checksum(&self.content);
    }
}

/// The validation result for one file type of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub file_type: FileType,
    pub valid: bool,
    pub message: Option<String>,
}

impl Validation {
    pub fn new(file_type: FileType, valid: bool, message: Option<String>) -> Self {
        Validation {
            file_type,
            valid,
            message,
        }
    }
}

/// A version author without an ORCID identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub affiliation: Option<String>,
}

/// One git reference's materialized state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Derived from the git reference (`main`, `1.0`).
    pub name: String,
    pub reference_type: ReferenceType,
    pub commit_id: Option<CommitHash>,
    /// Once true, nothing below the version may be changed by synchronization.
    pub frozen: bool,
    /// Path of the primary descriptor.
    pub workflow_path: String,
    pub source_files: Vec<SourceFile>,
    pub validations: Vec<Validation>,
    pub last_modified: DateTime<Utc>,
    pub valid: bool,
    pub legacy_version: bool,
    pub aliases: BTreeSet<String>,
    pub authors: Vec<Author>,
    pub orcid_authors: Vec<String>,
    pub descriptor_type_versions: Vec<String>,
    pub engine_versions: Vec<String>,
    pub file_formats: BTreeSet<String>,
    pub description: Option<String>,
    /// Set when the primary descriptor changed and the cached description or
    /// topic summary must be regenerated.
    pub summary_stale: bool,
    /// Cached dependency graph, recomputed lazily when cleared.
    pub dag_json: Option<String>,
    /// Cached tool table, recomputed lazily when cleared.
    pub tool_table_json: Option<String>,
    pub has_open_data: bool,
    pub verified: bool,
    pub verified_platforms: BTreeSet<String>,
}

impl Version {
    pub fn new(name: impl Into<String>, reference_type: ReferenceType) -> Self {
        Version {
            name: name.into(),
            reference_type,
            commit_id: None,
            frozen: false,
            workflow_path: String::new(),
            source_files: Vec::new(),
            validations: Vec::new(),
            last_modified: Utc::now(),
            valid: false,
            legacy_version: false,
            aliases: BTreeSet::new(),
            authors: Vec::new(),
            orcid_authors: Vec::new(),
            descriptor_type_versions: Vec::new(),
            engine_versions: Vec::new(),
            file_formats: BTreeSet::new(),
            description: None,
            summary_stale: false,
            dag_json: None,
            tool_table_json: None,
            has_open_data: false,
            verified: false,
            verified_platforms: BTreeSet::new(),
        }
    }

    pub fn source_file(&self, file_type: FileType, absolute_path: &str) -> Option<&SourceFile> {
        self.source_files
            .iter()
            .find(|f| f.file_type == file_type && f.absolute_path == absolute_path)
    }

    /// Creates or overwrites the validation for `validation.file_type`.
    pub fn add_or_update_validation(&mut self, validation: Validation) {
        match self
            .validations
            .iter_mut()
            .find(|v| v.file_type == validation.file_type)
        {
            Some(existing) => *existing = validation,
            None => self.validations.push(validation),
        }
    }

    pub fn total_content_bytes(&self) -> usize {
        self.source_files.iter().map(|f| f.content.len()).sum()
    }

    /// Recomputes the verification flags from the files' verifying platforms.
    ///
    /// Idempotent: calling it twice yields the same flags.
    pub fn refresh_verification(&mut self) {
        self.verified_platforms = self
            .source_files
            .iter()
            .flat_map(|f| f.verified_by.iter().cloned())
            .collect();
        self.verified = !self.verified_platforms.is_empty();
    }
}
