//! Catalog persistence seam.
//!
//! Entries are stored as aggregates: an [`Entry`] owns its versions, and a
//! version owns its source files and validations. A [`CatalogSession`] is one
//! transaction. Reads see the session's own writes; nothing is visible to
//! other sessions until [`CatalogSession::commit`]. A commit that would
//! overwrite an entry another session committed in the meantime fails with
//! [`StoreError::Conflict`].
//!
//! Sessions are synchronous. All remote I/O happens before a session is
//! opened, so a session never spans an `.await`.

use thiserror::Error;

use crate::types::{Entry, EntryId, EntryKind, RepoPath, UserId};

pub mod memory;

pub use memory::MemoryCatalog;

/// Errors raised by catalog stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A commit would give two entries of one kind the same path.
    #[error("path {path} is already used by another {kind}")]
    DuplicatePath { kind: EntryKind, path: String },

    /// Another session committed a newer revision of the entry after this
    /// session read it.
    #[error("{path} was changed by a concurrent update (read revision {read}, now {current})")]
    Conflict {
        path: String,
        read: u64,
        current: u64,
    },

    /// The entry to save does not exist.
    #[error("entry {0} does not exist")]
    UnknownEntry(EntryId),

    /// The store itself failed (connection lost, lock poisoned, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether running the same work again may succeed. True for failures
    /// caused by a concurrent session committing first.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::DuplicatePath { .. }
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A local registry user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    /// Username on the source control platform.
    pub platform_username: String,
}

/// Opens transactional sessions against the catalog.
pub trait CatalogStore: Send + Sync {
    type Session: CatalogSession;

    fn begin(&self) -> Result<Self::Session>;
}

/// One catalog transaction.
pub trait CatalogSession {
    fn find_entry(&self, id: EntryId) -> Result<Option<Entry>>;

    fn find_entry_by_path(&self, kind: EntryKind, path: &str) -> Result<Option<Entry>>;

    /// Returns the kind of an entry in another partition that already uses
    /// `path`, if any.
    fn path_taken_by_other_kind(&self, kind: EntryKind, path: &str) -> Result<Option<EntryKind>>;

    /// All manifest-managed entries of any kind backed by `repository`.
    fn find_manifest_entries(&self, repository: &RepoPath) -> Result<Vec<Entry>>;

    fn find_user_by_platform_username(&self, username: &str) -> Result<Option<LocalUser>>;

    /// Inserts a new entry and returns its assigned id.
    fn create_entry(&mut self, entry: Entry) -> Result<EntryId>;

    /// Replaces a stored entry with `entry`.
    fn save_entry(&mut self, entry: &Entry) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}
