//! Shared test utilities: builders, a scripted source control fake, and
//! arbitrary generators for property-based testing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use crate::index::{IndexMode, Indexer};
use crate::manifest::{DeclaredUnit, UnitSettings};
use crate::source::{
    QuotaSnapshot, RemoteRepository, Result, SourceControlClient, SourceControlError,
    SourceErrorKind,
};
use crate::types::{
    CommitHash, Entry, EntryKind, FileType, GitReference, MANIFEST_PATH, RepoPath, SourceFile,
    Validation, Version,
};

pub const PRIMARY_DESCRIPTOR: &str = "/Dockstore.cwl";

// ─── Builders ───

pub fn file(file_type: FileType, path: &str, content: &str) -> SourceFile {
    SourceFile::new(file_type, path, path, content)
}

/// A branch version holding secondary descriptors at the given paths.
pub fn version_with_files(name: &str, files: &[(&str, &str)]) -> Version {
    let mut version = Version::new(name, crate::types::ReferenceType::Branch);
    version.source_files = files
        .iter()
        .map(|(path, content)| file(FileType::SecondaryDescriptor, path, content))
        .collect();
    version
}

/// An empty CWL workflow entry backed by `org/repo`.
pub fn entry_for(path: &str) -> Entry {
    Entry::new(
        EntryKind::Workflow,
        path,
        RepoPath::new("org", "repo"),
        None,
        "CWL",
        "n/a",
    )
}

pub fn manifest_file(content: &str) -> SourceFile {
    SourceFile::new(FileType::Manifest, MANIFEST_PATH, MANIFEST_PATH, content)
}

pub fn remote_repository(default_branch: &str) -> RemoteRepository {
    RemoteRepository {
        default_branch: default_branch.to_string(),
        description: None,
        git_url: "git@github.com:org/repo.git".to_string(),
        topic: None,
    }
}

/// A valid version of a CWL workflow at `reference`.
pub fn valid_version(reference: &GitReference) -> Version {
    let mut version = Version::new(&reference.name, reference.reference_type);
    version.valid = true;
    version.workflow_path = PRIMARY_DESCRIPTOR.to_string();
    version.commit_id = Some(CommitHash::new("0123456789abcdef0123456789abcdef01234567"));
    version.description = Some("Aligns reads".to_string());
    version.source_files.push(file(
        FileType::PrimaryDescriptor,
        PRIMARY_DESCRIPTOR,
        "cwlVersion: v1.2\nclass: Workflow\n",
    ));
    version.add_or_update_validation(Validation::new(FileType::PrimaryDescriptor, true, None));
    version
}

/// A CWL workflow unit with the conventional descriptor path.
pub fn workflow_unit(name: Option<&str>) -> DeclaredUnit {
    DeclaredUnit::Workflow {
        subclass: "CWL".to_string(),
        settings: UnitSettings {
            name: name.map(String::from),
            primary_descriptor_path: Some(PRIMARY_DESCRIPTOR.to_string()),
            ..UnitSettings::default()
        },
    }
}

/// A manifest declaring one CWL workflow per name.
pub fn workflows_manifest(names: &[&str]) -> String {
    let mut yaml = String::from("version: 1.2\nworkflows:\n");
    for name in names {
        yaml.push_str(&format!(
            "  - name: {}\n    subclass: CWL\n    primaryDescriptorPath: {}\n",
            name, PRIMARY_DESCRIPTOR
        ));
    }
    yaml
}

// ─── Scripted source control ───

/// An error to raise on every call, kept as parts since errors are not Clone.
#[derive(Debug, Clone)]
struct ScriptedError {
    kind: SourceErrorKind,
    status_code: Option<u16>,
    message: String,
}

impl ScriptedError {
    fn from_error(err: &SourceControlError) -> Self {
        ScriptedError {
            kind: err.kind,
            status_code: err.status_code,
            message: err.message.clone(),
        }
    }

    fn to_error(&self) -> SourceControlError {
        let mut err = SourceControlError::new(self.kind, self.message.clone());
        err.status_code = self.status_code;
        err
    }
}

#[derive(Debug)]
struct FakeState {
    hashes: HashMap<String, CommitHash>,
    hash_error: Option<ScriptedError>,
    manifest: Option<Vec<u8>>,
    manifest_error: Option<ScriptedError>,
    /// Files served per unit name (`""` for unnamed units).
    unit_files: HashMap<String, Vec<SourceFile>>,
    unit_errors: HashMap<String, ScriptedError>,
    repository: RemoteRepository,
    access: HashSet<String>,
    quota: QuotaSnapshot,
    materialize_calls: usize,
}

/// A [`SourceControlClient`] whose answers are set by the test.
///
/// Unscripted references do not exist, the repository's default branch is
/// `main`, and every unit materializes as [`valid_version`].
#[derive(Debug)]
pub struct FakeSourceControl {
    state: Mutex<FakeState>,
}

impl Default for FakeSourceControl {
    fn default() -> Self {
        FakeSourceControl {
            state: Mutex::new(FakeState {
                hashes: HashMap::new(),
                hash_error: None,
                manifest: None,
                manifest_error: None,
                unit_files: HashMap::new(),
                unit_errors: HashMap::new(),
                repository: remote_repository("main"),
                access: HashSet::new(),
                quota: QuotaSnapshot {
                    used: 0,
                    remaining: 5000,
                },
                materialize_calls: 0,
            }),
        }
    }
}

impl FakeSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_hash(&self, reference: &GitReference, hash: &str) {
        self.state()
            .hashes
            .insert(reference.full.clone(), CommitHash::new(hash));
    }

    pub fn remove_hash(&self, reference: &GitReference) {
        self.state().hashes.remove(&reference.full);
    }

    pub fn fail_hash_lookup(&self, err: SourceControlError) {
        self.state().hash_error = Some(ScriptedError::from_error(&err));
    }

    pub fn set_manifest(&self, content: &str) {
        self.state().manifest = Some(content.as_bytes().to_vec());
    }

    pub fn fail_manifest(&self, err: SourceControlError) {
        self.state().manifest_error = Some(ScriptedError::from_error(&err));
    }

    /// Serves `files` in addition to the primary descriptor for the named unit.
    pub fn set_unit_files(&self, unit_name: &str, files: Vec<SourceFile>) {
        self.state().unit_files.insert(unit_name.to_string(), files);
    }

    pub fn fail_unit(&self, unit_name: &str, err: SourceControlError) {
        self.state()
            .unit_errors
            .insert(unit_name.to_string(), ScriptedError::from_error(&err));
    }

    pub fn set_default_branch(&self, branch: &str) {
        self.state().repository.default_branch = branch.to_string();
    }

    pub fn grant_access(&self, username: &str) {
        self.state().access.insert(username.to_string());
    }

    pub fn set_quota(&self, used: u64, remaining: u64) {
        self.state().quota = QuotaSnapshot { used, remaining };
    }

    pub fn materialize_calls(&self) -> usize {
        self.state().materialize_calls
    }
}

impl SourceControlClient for FakeSourceControl {
    async fn current_hash(
        &self,
        _repo: &RepoPath,
        reference: &GitReference,
    ) -> Result<Option<CommitHash>> {
        let state = self.state();
        if let Some(err) = &state.hash_error {
            return Err(err.to_error());
        }
        Ok(state.hashes.get(&reference.full).cloned())
    }

    async fn fetch_manifest(&self, _repo: &RepoPath, _reference: &GitReference) -> Result<Vec<u8>> {
        let state = self.state();
        if let Some(err) = &state.manifest_error {
            return Err(err.to_error());
        }
        state
            .manifest
            .clone()
            .ok_or_else(|| SourceControlError::not_found("no manifest"))
    }

    async fn materialize_version(
        &self,
        _repo: &RepoPath,
        reference: &GitReference,
        unit: &DeclaredUnit,
    ) -> Result<Version> {
        let mut state = self.state();
        state.materialize_calls += 1;
        let key = unit.name().unwrap_or_default();
        if let Some(err) = state.unit_errors.get(key) {
            return Err(err.to_error());
        }
        let mut version = valid_version(reference);
        if let Some(files) = state.unit_files.get(key) {
            version.source_files.extend(files.iter().cloned());
        }
        Ok(version)
    }

    async fn repository(&self, _repo: &RepoPath) -> Result<RemoteRepository> {
        Ok(self.state().repository.clone())
    }

    async fn has_access(&self, _repo: &RepoPath, username: &str) -> Result<bool> {
        Ok(self.state().access.contains(username))
    }

    async fn quota_snapshot(&self) -> Result<QuotaSnapshot> {
        Ok(self.state().quota)
    }
}

// ─── Indexer ───

/// Records index notifications as `(entry path, mode)`.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndexer {
    notices: Arc<Mutex<Vec<(String, IndexMode)>>>,
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(String, IndexMode)> {
        self.notices.lock().unwrap().clone()
    }
}

impl Indexer for RecordingIndexer {
    fn on_entry_changed(&self, entry: &Entry, mode: IndexMode) {
        self.notices.lock().unwrap().push((entry.path.clone(), mode));
    }
}

// ─── Strategies ───

pub fn arb_hash() -> impl Strategy<Value = CommitHash> {
    "[0-9a-f]{40}".prop_map(CommitHash::new)
}

pub fn arb_reference() -> impl Strategy<Value = GitReference> {
    prop_oneof![
        "[a-z][a-z0-9/-]{0,20}".prop_map(|b| GitReference::parse(format!("refs/heads/{}", b))),
        "[0-9]\\.[0-9]{1,2}".prop_map(|t| GitReference::parse(format!("refs/tags/{}", t))),
    ]
}

pub fn arb_unit_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}(-[a-z0-9]{1,4})?".prop_map(String::from)
}
