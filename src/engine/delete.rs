//! Removing versions whose git reference was deleted.
//!
//! When the deleted version is the entry's default, a new default is chosen
//! first: the remaining version with the latest `last_modified`, ties broken
//! by the greatest name. An entry left with no versions is unpublished.

use tracing::{debug, info};

use crate::index::IndexMode;
use crate::store::{CatalogSession, StoreError};
use crate::types::{Entry, EntryId, Version};

use super::reconcile::IndexNotice;

/// What deleting a reference did to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// The entry no longer exists.
    Vanished,
    /// No version of the entry is named after the reference.
    Unaffected,
    /// The entry is archived; nothing was removed.
    Archived { entry_path: String },
    /// The matching version is frozen; nothing was removed.
    FrozenOnly { entry_path: String },
    /// The matching version was removed.
    Applied {
        entry_path: String,
        removed: Vec<String>,
        /// The default elected to replace a removed default.
        new_default: Option<String>,
        unpublished: bool,
        notice: IndexNotice,
    },
}

/// Deletes versions from entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionReconciler;

impl DeletionReconciler {
    pub fn reconcile<S: CatalogSession>(
        &self,
        session: &mut S,
        entry_id: EntryId,
        ref_name: &str,
    ) -> Result<DeletionOutcome, StoreError> {
        let Some(mut entry) = session.find_entry(entry_id)? else {
            debug!(entry_id = %entry_id, "Entry vanished before deletion");
            return Ok(DeletionOutcome::Vanished);
        };

        // Version names are unique within an entry.
        match entry.versions.iter().find(|v| v.name == ref_name) {
            None => return Ok(DeletionOutcome::Unaffected),
            Some(version) if version.frozen => {
                return Ok(DeletionOutcome::FrozenOnly {
                    entry_path: entry.path,
                });
            }
            Some(_) => {}
        }
        if entry.is_archived {
            return Ok(DeletionOutcome::Archived {
                entry_path: entry.path,
            });
        }

        let is_eligible = |v: &Version| v.name == ref_name && !v.frozen;
        let mut new_default = None;
        if entry.default_version().is_some_and(is_eligible) {
            new_default = representative(entry.versions.iter().filter(|v| !is_eligible(*v)))
                .map(|v| v.name.clone());
            entry.default_version = new_default.clone();
        }

        let removed: Vec<String> = entry
            .versions
            .iter()
            .filter(|v| is_eligible(*v))
            .map(|v| v.name.clone())
            .collect();
        entry.versions.retain(|v| !is_eligible(v));
        entry.refresh_aggregates();

        let unpublished = entry.is_published && entry.versions.is_empty();
        if unpublished {
            entry.is_published = false;
            unpublish_checker(session, &entry)?;
        }
        session.save_entry(&entry)?;

        info!(
            entry = %entry.path,
            removed = removed.len(),
            new_default = ?new_default,
            unpublished,
            "Deleted versions"
        );
        let mode = if unpublished {
            IndexMode::Delete
        } else {
            IndexMode::Update
        };
        Ok(DeletionOutcome::Applied {
            entry_path: entry.path.clone(),
            removed,
            new_default,
            unpublished,
            notice: IndexNotice { entry, mode },
        })
    }
}

/// The most representative version of a set: latest `last_modified`, then
/// greatest name.
pub fn representative<'v>(versions: impl Iterator<Item = &'v Version>) -> Option<&'v Version> {
    versions.max_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.name.cmp(&b.name))
    })
}

fn unpublish_checker<S: CatalogSession>(session: &mut S, entry: &Entry) -> Result<(), StoreError> {
    if let Some(checker_id) = entry.checker_entry {
        if let Some(mut checker) = session.find_entry(checker_id)? {
            checker.is_published = false;
            session.save_entry(&checker)?;
        }
    }
    Ok(())
}
