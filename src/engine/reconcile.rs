//! Reconciling one declared unit against the catalog.
//!
//! Reconciliation runs in two transactions. [`EntryReconciler::reconcile`]
//! resolves or creates the entry and merges the version; once that has
//! committed, [`EntryReconciler::finish`] applies the publish flag and
//! propagates default-version metadata in a continued session.

use tracing::{debug, info};

use crate::index::IndexMode;
use crate::manifest::{DeclaredUnit, UnitSettings};
use crate::source::RemoteRepository;
use crate::store::CatalogSession;
use crate::types::{
    Entry, EntryId, EntryKind, EntryMode, GitReference, MANIFEST_PATH, RepoPath, SourceFile,
    TopicSelection, Version, entry_path,
};

use super::error::UnitError;
use super::merge::{MergeOptions, MergeOutcome, VersionMerger};

/// Everything needed to reconcile one unit, fetched before the transaction
/// opens.
#[derive(Debug)]
pub struct UnitContext<'a> {
    pub unit: &'a DeclaredUnit,
    pub repository: &'a RepoPath,
    pub reference: &'a GitReference,
    /// The manifest file the unit was declared in, stored on the version.
    pub manifest_file: &'a SourceFile,
    pub remote: &'a RemoteRepository,
    pub remote_version: Version,
    /// Platform username of the authenticated actor.
    pub actor: Option<&'a str>,
    /// Other contributors that currently have repository access.
    pub contributors: &'a [String],
}

/// Result of the first reconciliation phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledUnit {
    pub entry_id: EntryId,
    pub entry_path: String,
    pub kind: EntryKind,
    pub entry_created: bool,
    pub merge: MergeOutcome,
}

/// A publish-state change requested by the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAttempt {
    /// True to publish, false to unpublish.
    pub publish: bool,
    pub success: bool,
    pub message: String,
}

/// A change to report to the indexer once committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNotice {
    pub entry: Entry,
    pub mode: IndexMode,
}

/// Everything one unit's reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub entry_id: EntryId,
    pub entry_path: String,
    pub kind: EntryKind,
    pub version_name: String,
    pub entry_created: bool,
    pub version_created: bool,
    pub frozen_skipped: bool,
    pub became_default: bool,
    pub publish: Option<PublishAttempt>,
    pub notices: Vec<IndexNotice>,
}

impl UnitOutcome {
    /// One-line description for the audit trail.
    pub fn summary(&self) -> String {
        let action = match (self.entry_created, self.version_created, self.frozen_skipped) {
            (_, _, true) => "left frozen version",
            (true, _, _) => "created entry with version",
            (false, true, _) => "added version",
            (false, false, false) => "updated version",
        };
        let mut summary = format!("{} {} {}", action, self.version_name, self.entry_path);
        if self.became_default {
            summary.push_str(" (now default)");
        }
        summary
    }
}

/// The shape an entry must have for a unit, decided once per unit kind.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnitStrategy {
    kind: EntryKind,
    name: Option<String>,
    descriptor_language: String,
    descriptor_subclass: String,
}

impl UnitStrategy {
    fn for_unit(unit: &DeclaredUnit) -> Self {
        let (descriptor_language, descriptor_subclass) = unit.descriptor();
        let name = match unit {
            DeclaredUnit::Service { .. } => None,
            DeclaredUnit::Workflow { .. }
            | DeclaredUnit::Tool { .. }
            | DeclaredUnit::Notebook { .. } => unit.name().map(str::to_string),
        };
        UnitStrategy {
            kind: unit.kind(),
            name,
            descriptor_language,
            descriptor_subclass,
        }
    }

    fn matches(&self, entry: &Entry) -> bool {
        entry
            .descriptor_language
            .eq_ignore_ascii_case(&self.descriptor_language)
            && entry
                .descriptor_subclass
                .eq_ignore_ascii_case(&self.descriptor_subclass)
    }
}

/// Rejects a unit whose declared shape is invalid for its kind.
pub fn validate_unit(unit: &DeclaredUnit) -> Result<(), UnitError> {
    unit.validate().map_err(|reason| UnitError::InvalidUnit {
        kind: unit.kind(),
        reason,
    })
}

/// Reconciles declared units into catalog entries.
pub struct EntryReconciler<'a> {
    merger: VersionMerger<'a>,
    host: &'a str,
}

impl<'a> EntryReconciler<'a> {
    pub fn new(merger: VersionMerger<'a>, host: &'a str) -> Self {
        Self { merger, host }
    }

    /// Resolves or creates the entry for the unit and merges its version.
    pub fn reconcile<S: CatalogSession>(
        &self,
        session: &mut S,
        ctx: UnitContext<'_>,
    ) -> Result<ReconciledUnit, UnitError> {
        validate_unit(ctx.unit)?;
        let strategy = UnitStrategy::for_unit(ctx.unit);

        let path = entry_path(self.host, ctx.repository, strategy.name.as_deref());
        let (mut entry, entry_created) = match session.find_entry_by_path(strategy.kind, &path)? {
            Some(mut existing) => {
                refresh_existing(&mut existing, ctx.remote);
                (existing, false)
            }
            None => (self.create_entry(session, &strategy, &path, &ctx)?, true),
        };

        if !strategy.matches(&entry) {
            return Err(UnitError::IncompatibleDescriptor {
                path,
                existing_language: entry.descriptor_language,
                existing_subclass: entry.descriptor_subclass,
                declared_language: strategy.descriptor_language,
                declared_subclass: strategy.descriptor_subclass,
            });
        }
        if entry.is_archived {
            return Err(UnitError::Archived(path));
        }

        attach_users(session, &mut entry, ctx.actor, ctx.contributors)?;
        apply_topic_and_doi(&mut entry, ctx.unit.settings());

        let mut remote_version = ctx.remote_version;
        if remote_version
            .source_file(ctx.manifest_file.file_type, &ctx.manifest_file.absolute_path)
            .is_none()
        {
            remote_version.source_files.push(ctx.manifest_file.clone());
        }

        let settings = ctx.unit.settings();
        let options = MergeOptions {
            reference: ctx.reference,
            descriptor_language: &strategy.descriptor_language,
            manifest_authors: &settings.authors,
            latest_tag_as_default: settings.latest_tag_as_default,
            remote_default_branch: &ctx.remote.default_branch,
        };
        let merge = self.merger.apply(&mut entry, remote_version, &options)?;

        let entry_id = if entry_created {
            session.create_entry(entry)?
        } else {
            session.save_entry(&entry)?;
            entry.id
        };
        debug!(entry = %path, entry_id = %entry_id, version = %merge.version_name, "Reconciled unit");

        Ok(ReconciledUnit {
            entry_id,
            entry_path: path,
            kind: strategy.kind,
            entry_created,
            merge,
        })
    }

    /// Applies the publish flag and propagates default-version metadata.
    pub fn finish<S: CatalogSession>(
        &self,
        session: &mut S,
        reconciled: ReconciledUnit,
        settings: &UnitSettings,
    ) -> Result<UnitOutcome, UnitError> {
        let mut entry = session
            .find_entry(reconciled.entry_id)?
            .ok_or(crate::store::StoreError::UnknownEntry(reconciled.entry_id))?;
        let mut notices = Vec::new();

        let publish = match settings.publish {
            Some(wanted) if wanted != entry.is_published => {
                Some(set_published(session, &mut entry, wanted, &mut notices)?)
            }
            _ => None,
        };

        let version_name = reconciled.merge.version_name.clone();
        if entry.default_version.as_deref() == Some(version_name.as_str()) {
            if let Some(description) = entry.default_version().and_then(|v| v.description.clone()) {
                entry.description = Some(description);
            }
            notices.push(IndexNotice {
                entry: entry.clone(),
                mode: IndexMode::Update,
            });
        }
        session.save_entry(&entry)?;

        Ok(UnitOutcome {
            entry_id: reconciled.entry_id,
            entry_path: reconciled.entry_path,
            kind: reconciled.kind,
            version_name,
            entry_created: reconciled.entry_created,
            version_created: reconciled.merge.created,
            frozen_skipped: reconciled.merge.frozen_skipped,
            became_default: reconciled.merge.became_default,
            publish,
            notices,
        })
    }

    fn create_entry<S: CatalogSession>(
        &self,
        session: &S,
        strategy: &UnitStrategy,
        path: &str,
        ctx: &UnitContext<'_>,
    ) -> Result<Entry, UnitError> {
        if let Some(existing) = session.path_taken_by_other_kind(strategy.kind, path)? {
            return Err(UnitError::PathCollision {
                path: path.to_string(),
                existing,
            });
        }

        let actor = ctx.actor.unwrap_or("<anonymous>");
        if session.find_user_by_platform_username(actor)?.is_none() {
            return Err(UnitError::NoLocalUser(actor.to_string()));
        }

        let mut entry = Entry::new(
            strategy.kind,
            path,
            ctx.repository.clone(),
            strategy.name.clone(),
            strategy.descriptor_language.clone(),
            strategy.descriptor_subclass.clone(),
        );
        refresh_existing(&mut entry, ctx.remote);
        info!(entry = %path, kind = %strategy.kind, "Creating entry");
        Ok(entry)
    }
}

/// Refreshes repository-derived metadata and takes over manually managed
/// entries.
fn refresh_existing(entry: &mut Entry, remote: &RemoteRepository) {
    entry.git_url = remote.git_url.clone();
    entry.default_branch = Some(remote.default_branch.clone());
    if remote.description.is_some() {
        entry.description = remote.description.clone();
    }
    entry.topic_automatic = remote.topic.clone();

    if matches!(entry.mode, EntryMode::Full | EntryMode::Stub) {
        info!(entry = %entry.path, from = ?entry.mode, "Converting entry to manifest-managed");
        entry.mode = EntryMode::ManifestManaged;
        entry.default_descriptor_path = MANIFEST_PATH.to_string();
    }
}

fn attach_users<S: CatalogSession>(
    session: &S,
    entry: &mut Entry,
    actor: Option<&str>,
    contributors: &[String],
) -> Result<(), UnitError> {
    for username in actor.into_iter().chain(contributors.iter().map(String::as_str)) {
        if let Some(user) = session.find_user_by_platform_username(username)? {
            entry.users.insert(user.id);
        }
    }
    Ok(())
}

fn apply_topic_and_doi(entry: &mut Entry, settings: &UnitSettings) {
    match settings.topic.as_deref() {
        Some(topic) if !topic.trim().is_empty() => {
            entry.topic_manual = Some(topic.to_string());
            entry.topic_selection = TopicSelection::Manual;
        }
        Some(_) => {
            entry.topic_manual = None;
            if entry.topic_selection == TopicSelection::Manual {
                entry.topic_selection = TopicSelection::Automatic;
            }
        }
        None => {}
    }

    if settings.enable_auto_dois == Some(false) {
        entry.auto_doi_enabled = false;
    }
}

/// Publishes or unpublishes `entry`, mirroring onto its checker entry.
fn set_published<S: CatalogSession>(
    session: &mut S,
    entry: &mut Entry,
    publish: bool,
    notices: &mut Vec<IndexNotice>,
) -> Result<PublishAttempt, UnitError> {
    if publish {
        if entry.git_url.is_empty() {
            return Ok(PublishAttempt {
                publish,
                success: false,
                message: format!("{} has no git URL and cannot be published", entry.path),
            });
        }
        if !entry.versions.iter().any(|v| v.valid) {
            return Ok(PublishAttempt {
                publish,
                success: false,
                message: format!("{} has no valid version and cannot be published", entry.path),
            });
        }
    }

    entry.is_published = publish;
    if let Some(checker_id) = entry.checker_entry {
        if let Some(mut checker) = session.find_entry(checker_id)? {
            checker.is_published = publish;
            session.save_entry(&checker)?;
        }
    }

    let mode = if publish {
        IndexMode::Publish
    } else {
        IndexMode::Delete
    };
    notices.push(IndexNotice {
        entry: entry.clone(),
        mode,
    });

    let verb = if publish { "published" } else { "unpublished" };
    info!(entry = %entry.path, "Entry {}", verb);
    Ok(PublishAttempt {
        publish,
        success: true,
        message: format!("{} {}", verb, entry.path),
    })
}
