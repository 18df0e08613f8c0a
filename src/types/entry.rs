//! Catalog entries.
//!
//! An entry is a named, typed, versioned artifact. Entries are partitioned by
//! [`EntryKind`]; a path is unique within its kind's partition.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EntryId, RepoPath, UserId};
use super::version::Version;

/// Default descriptor path of manifest-managed entries.
pub const MANIFEST_PATH: &str = "/.dockstore.yml";

/// The partition an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Workflow,
    Tool,
    Service,
    Notebook,
}

impl EntryKind {
    pub const ALL: [EntryKind; 4] = [
        EntryKind::Workflow,
        EntryKind::Tool,
        EntryKind::Service,
        EntryKind::Notebook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Workflow => "workflow",
            EntryKind::Tool => "tool",
            EntryKind::Service => "service",
            EntryKind::Notebook => "notebook",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an entry's versions are maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Registered manually and refreshed on demand.
    Full,
    /// Registered manually but never refreshed.
    Stub,
    /// Content hosted by the registry itself.
    Hosted,
    /// Declared in a repository manifest and kept in sync by webhooks.
    ManifestManaged,
}

/// Which topic is shown for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicSelection {
    Automatic,
    Manual,
}

/// Builds the catalog path `host/owner/repo[/name]`.
///
/// The name segment is omitted when the name is absent or empty.
pub fn entry_path(host: &str, repository: &RepoPath, name: Option<&str>) -> String {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => format!("{}/{}/{}", host, repository, name),
        None => format!("{}/{}", host, repository),
    }
}

/// A named, typed, versioned artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub path: String,
    pub repository: RepoPath,
    pub name: Option<String>,
    pub descriptor_language: String,
    pub descriptor_subclass: String,
    pub mode: EntryMode,
    pub git_url: String,
    pub default_branch: Option<String>,
    pub description: Option<String>,
    pub default_descriptor_path: String,
    pub is_published: bool,
    pub is_archived: bool,
    pub is_checker: bool,
    /// Name of the default version, if one has been elected.
    pub default_version: Option<String>,
    pub checker_entry: Option<EntryId>,
    pub topic_automatic: Option<String>,
    pub topic_manual: Option<String>,
    pub topic_selection: TopicSelection,
    pub auto_doi_enabled: bool,
    pub users: BTreeSet<UserId>,
    /// Union of the versions' file formats.
    pub file_formats: BTreeSet<String>,
    pub versions: Vec<Version>,
    pub last_updated: DateTime<Utc>,
    /// Store revision this copy was read at. Bumped on every commit that
    /// writes the entry.
    #[serde(default)]
    pub revision: u64,
}

impl Entry {
    /// Creates an empty, unpublished, manifest-managed entry.
    ///
    /// The id is assigned by the store on creation.
    pub fn new(
        kind: EntryKind,
        path: impl Into<String>,
        repository: RepoPath,
        name: Option<String>,
        descriptor_language: impl Into<String>,
        descriptor_subclass: impl Into<String>,
    ) -> Self {
        Entry {
            id: EntryId(0),
            kind,
            path: path.into(),
            repository,
            name,
            descriptor_language: descriptor_language.into(),
            descriptor_subclass: descriptor_subclass.into(),
            mode: EntryMode::ManifestManaged,
            git_url: String::new(),
            default_branch: None,
            description: None,
            default_descriptor_path: MANIFEST_PATH.to_string(),
            is_published: false,
            is_archived: false,
            is_checker: false,
            default_version: None,
            checker_entry: None,
            topic_automatic: None,
            topic_manual: None,
            topic_selection: TopicSelection::Automatic,
            auto_doi_enabled: true,
            users: BTreeSet::new(),
            file_formats: BTreeSet::new(),
            versions: Vec::new(),
            last_updated: Utc::now(),
            revision: 0,
        }
    }

    pub fn version(&self, name: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.name == name)
    }

    pub fn version_mut(&mut self, name: &str) -> Option<&mut Version> {
        self.versions.iter_mut().find(|v| v.name == name)
    }

    pub fn default_version(&self) -> Option<&Version> {
        self.default_version
            .as_deref()
            .and_then(|name| self.version(name))
    }

    pub fn is_manifest_managed(&self) -> bool {
        self.mode == EntryMode::ManifestManaged
    }

    /// Recomputes entry-level aggregates from the current versions.
    pub fn refresh_aggregates(&mut self) {
        self.file_formats = self
            .versions
            .iter()
            .flat_map(|v| v.file_formats.iter().cloned())
            .collect();
        self.last_updated = Utc::now();
    }
}
