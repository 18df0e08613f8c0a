//! Core domain types for the registry sync engine.
//!
//! This module contains the catalog data model (entries, versions, source
//! files) and the identifiers used throughout the application.

pub mod entry;
pub mod ids;
pub mod reference;
pub mod version;

// Re-export commonly used types at the module level
pub use entry::{Entry, EntryKind, EntryMode, MANIFEST_PATH, TopicSelection, entry_path};
pub use ids::{CommitHash, DeliveryId, EntryId, InvalidRepoPath, RepoPath, UserId};
pub use reference::{GitReference, ReferenceType};
pub use version::{
    Author, FileKey, FileType, SourceFile, Validation, Version, content_checksum,
};
