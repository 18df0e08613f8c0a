//! Git reference parsing.
//!
//! Notifications carry fully-qualified references (`refs/heads/main`,
//! `refs/tags/1.0`). Versions are named after the short form.

use serde::{Deserialize, Serialize};
use std::fmt;

const BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";

/// The kind of git reference a version was materialized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Branch,
    Tag,
    NotApplicable,
}

impl ReferenceType {
    /// Classifies a fully-qualified reference by its prefix.
    pub fn from_ref(full: &str) -> Self {
        if full.starts_with(BRANCH_PREFIX) {
            ReferenceType::Branch
        } else if full.starts_with(TAG_PREFIX) {
            ReferenceType::Tag
        } else {
            ReferenceType::NotApplicable
        }
    }
}

/// A parsed git reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitReference {
    /// The reference exactly as received (e.g. `refs/tags/1.0`).
    pub full: String,
    pub reference_type: ReferenceType,
    /// The short name: the part after `refs/heads/` or `refs/tags/`, or the
    /// full string for anything else.
    pub name: String,
}

impl GitReference {
    pub fn parse(full: impl Into<String>) -> Self {
        let full = full.into();
        let reference_type = ReferenceType::from_ref(&full);
        let name = match reference_type {
            ReferenceType::Branch => full[BRANCH_PREFIX.len()..].to_string(),
            ReferenceType::Tag => full[TAG_PREFIX.len()..].to_string(),
            ReferenceType::NotApplicable => full.clone(),
        };
        GitReference {
            full,
            reference_type,
            name,
        }
    }

    /// Returns true for branch or tag references with a non-empty short name.
    pub fn is_branch_or_tag(&self) -> bool {
        self.reference_type != ReferenceType::NotApplicable && !self.name.is_empty()
    }
}

impl fmt::Display for GitReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full)
    }
}
