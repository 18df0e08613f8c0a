//! Search index notifications.
//!
//! The engine tells an external indexer when an entry changed. Notifications
//! are fire-and-forget and are sent only after the change has committed.

use std::fmt;

use tracing::info;

use crate::types::Entry;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMode {
    Update,
    Delete,
    Publish,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexMode::Update => "update",
            IndexMode::Delete => "delete",
            IndexMode::Publish => "publish",
        };
        f.write_str(s)
    }
}

/// Receives entry change notifications.
pub trait Indexer: Send + Sync {
    fn on_entry_changed(&self, entry: &Entry, mode: IndexMode);
}

/// Logs notifications instead of forwarding them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingIndexer;

impl Indexer for TracingIndexer {
    fn on_entry_changed(&self, entry: &Entry, mode: IndexMode) {
        info!(
            entry = %entry.path,
            kind = %entry.kind,
            mode = %mode,
            published = entry.is_published,
            "Entry changed"
        );
    }
}
