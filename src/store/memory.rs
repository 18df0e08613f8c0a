//! In-process transactional catalog.
//!
//! A session keeps a working copy of every entry it creates or saves.
//! Reads consult the working copy first, then the committed state. Commit
//! checks that no entry in the working copy was committed by someone else
//! since it was read, checks per-kind path uniqueness, and publishes the
//! working copy in one step; rollback or drop discards it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{CatalogSession, CatalogStore, LocalUser, Result, StoreError};
use crate::types::{Entry, EntryId, EntryKind, RepoPath, UserId};

#[derive(Debug, Default)]
struct CatalogState {
    entries: BTreeMap<EntryId, Entry>,
    users: Vec<LocalUser>,
    next_entry_id: u64,
    next_user_id: u64,
    fail_next_commit: bool,
}

impl CatalogState {
    fn allocate_entry_id(&mut self) -> EntryId {
        self.next_entry_id += 1;
        EntryId(self.next_entry_id)
    }
}

fn lock(state: &Mutex<CatalogState>) -> Result<MutexGuard<'_, CatalogState>> {
    state
        .lock()
        .map_err(|_| StoreError::Unavailable("catalog lock poisoned".to_string()))
}

/// A catalog held in memory and shared between sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a local user linked to a platform username.
    pub fn register_user(&self, platform_username: impl Into<String>) -> Result<UserId> {
        let mut state = lock(&self.state)?;
        state.next_user_id += 1;
        let id = UserId(state.next_user_id);
        state.users.push(LocalUser {
            id,
            platform_username: platform_username.into(),
        });
        Ok(id)
    }

    /// Inserts an entry directly, outside any session.
    pub fn insert_entry(&self, mut entry: Entry) -> Result<EntryId> {
        let mut state = lock(&self.state)?;
        let id = state.allocate_entry_id();
        entry.id = id;
        state.entries.insert(id, entry);
        Ok(id)
    }

    /// Removes an entry directly, outside any session.
    pub fn remove_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        Ok(lock(&self.state)?.entries.remove(&id))
    }

    /// Returns the committed state of one entry.
    pub fn entry(&self, id: EntryId) -> Result<Option<Entry>> {
        Ok(lock(&self.state)?.entries.get(&id).cloned())
    }

    /// Returns every committed entry, ordered by id.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        Ok(lock(&self.state)?.entries.values().cloned().collect())
    }

    /// Makes the next commit of any session fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_next_commit(&self) -> Result<()> {
        lock(&self.state)?.fail_next_commit = true;
        Ok(())
    }
}

impl CatalogStore for MemoryCatalog {
    type Session = MemorySession;

    fn begin(&self) -> Result<MemorySession> {
        Ok(MemorySession {
            state: Arc::clone(&self.state),
            pending: BTreeMap::new(),
        })
    }
}

/// One transaction against a [`MemoryCatalog`].
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<CatalogState>>,
    pending: BTreeMap<EntryId, Entry>,
}

impl MemorySession {
    /// Committed entries overlaid with this session's working copy.
    fn visible_entries(&self) -> Result<Vec<Entry>> {
        let state = lock(&self.state)?;
        let mut visible: BTreeMap<EntryId, Entry> = state
            .entries
            .iter()
            .filter(|(id, _)| !self.pending.contains_key(id))
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        drop(state);

        visible.extend(self.pending.iter().map(|(id, e)| (*id, e.clone())));
        Ok(visible.into_values().collect())
    }
}

impl CatalogSession for MemorySession {
    fn find_entry(&self, id: EntryId) -> Result<Option<Entry>> {
        if let Some(entry) = self.pending.get(&id) {
            return Ok(Some(entry.clone()));
        }
        Ok(lock(&self.state)?.entries.get(&id).cloned())
    }

    fn find_entry_by_path(&self, kind: EntryKind, path: &str) -> Result<Option<Entry>> {
        Ok(self
            .visible_entries()?
            .into_iter()
            .find(|e| e.kind == kind && e.path == path))
    }

    fn path_taken_by_other_kind(&self, kind: EntryKind, path: &str) -> Result<Option<EntryKind>> {
        Ok(self
            .visible_entries()?
            .into_iter()
            .find(|e| e.kind != kind && e.path == path)
            .map(|e| e.kind))
    }

    fn find_manifest_entries(&self, repository: &RepoPath) -> Result<Vec<Entry>> {
        Ok(self
            .visible_entries()?
            .into_iter()
            .filter(|e| e.is_manifest_managed() && &e.repository == repository)
            .collect())
    }

    fn find_user_by_platform_username(&self, username: &str) -> Result<Option<LocalUser>> {
        Ok(lock(&self.state)?
            .users
            .iter()
            .find(|u| u.platform_username == username)
            .cloned())
    }

    fn create_entry(&mut self, mut entry: Entry) -> Result<EntryId> {
        let id = lock(&self.state)?.allocate_entry_id();
        entry.id = id;
        self.pending.insert(id, entry);
        Ok(id)
    }

    fn save_entry(&mut self, entry: &Entry) -> Result<()> {
        let known = self.pending.contains_key(&entry.id)
            || lock(&self.state)?.entries.contains_key(&entry.id);
        if !known {
            return Err(StoreError::UnknownEntry(entry.id));
        }
        self.pending.insert(entry.id, entry.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.fail_next_commit {
            state.fail_next_commit = false;
            self.pending.clear();
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }

        for entry in self.pending.values() {
            if let Some(committed) = state.entries.get(&entry.id) {
                if committed.revision != entry.revision {
                    return Err(StoreError::Conflict {
                        path: entry.path.clone(),
                        read: entry.revision,
                        current: committed.revision,
                    });
                }
            }
        }

        for entry in self.pending.values() {
            let clash = state
                .entries
                .values()
                .filter(|other| !self.pending.contains_key(&other.id))
                .chain(self.pending.values())
                .any(|other| {
                    other.id != entry.id && other.kind == entry.kind && other.path == entry.path
                });
            if clash {
                return Err(StoreError::DuplicatePath {
                    kind: entry.kind,
                    path: entry.path.clone(),
                });
            }
        }

        let written = self.pending.len();
        for entry in self.pending.values_mut() {
            entry.revision += 1;
        }
        state.entries.append(&mut self.pending);
        debug!(entries = written, "Committed catalog session");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}
