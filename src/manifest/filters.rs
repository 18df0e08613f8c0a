//! Branch and tag filters on declared units.
//!
//! A unit with no filters applies to every reference. Otherwise branches are
//! matched against `branches` and tags against `tags`, using the short
//! reference name. A pattern wrapped in slashes (`/release-.*/`) is a regular
//! expression that must match the whole name; anything else is a glob in
//! which `*` does not cross `/`.

use globset::GlobBuilder;
use regex_lite::Regex;
use tracing::warn;

use crate::types::{GitReference, ReferenceType};

/// Reference filters declared for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filters {
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.tags.is_empty()
    }

    /// Returns true if the unit applies to `reference`.
    pub fn accepts(&self, reference: &GitReference) -> bool {
        if self.is_empty() {
            return true;
        }
        let patterns = match reference.reference_type {
            ReferenceType::Branch => &self.branches,
            ReferenceType::Tag => &self.tags,
            ReferenceType::NotApplicable => return false,
        };
        patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, &reference.name))
    }
}

/// Matches one pattern against a short reference name. Invalid patterns
/// never match.
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let inner = &pattern[1..pattern.len() - 1];
        return match Regex::new(&format!("^(?:{})$", inner)) {
            Ok(regex) => regex.is_match(name),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Ignoring invalid filter regex");
                false
            }
        };
    }

    match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher().is_match(name),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Ignoring invalid filter glob");
            false
        }
    }
}
