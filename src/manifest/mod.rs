//! Manifest-declared units.
//!
//! A repository declares the entries it wants registered in a manifest file
//! (`.dockstore.yml`). This module provides the typed model of a parsed
//! manifest and the [`ManifestResolver`] seam that turns raw manifest bytes
//! into it.
//!
//! # Units
//!
//! Each declared unit is one of four kinds. The kind is a closed enum so the
//! reconciler picks its per-kind behavior once, by matching on the variant.
//!
//! | Variant | Descriptor language | Descriptor subclass |
//! |---------|---------------------|---------------------|
//! | `Workflow`, `Tool` | upper-cased subclass (CWL, WDL, ...) | `n/a` |
//! | `Service` | `SERVICE` | subclass (docker-compose, helm, ...) |
//! | `Notebook` | format (jupyter) | programming language |

use std::sync::LazyLock;

use regex_lite::Regex;
use thiserror::Error;

use crate::types::{Author, EntryKind};

pub mod filters;
pub mod yaml;

pub use filters::Filters;
pub use yaml::YamlManifestResolver;

/// Maximum length of a declared entry name.
pub const MAX_NAME_LENGTH: usize = 256;

/// Descriptor subclass recorded for workflows and tools.
pub const NOT_APPLICABLE_SUBCLASS: &str = "n/a";

/// Descriptor language recorded for services.
pub const SERVICE_LANGUAGE: &str = "SERVICE";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]+([-_][a-zA-Z0-9]+)*$").expect("static pattern is valid")
});

/// Errors that make a manifest unreadable as a whole.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest is not valid UTF-8.
    #[error("manifest is not valid UTF-8")]
    NotUtf8,

    /// The manifest is not valid YAML or does not match the expected layout.
    #[error("invalid manifest: {0}")]
    Syntax(#[from] serde_yaml::Error),

    /// The manifest does not declare a version.
    #[error("manifest does not declare a version")]
    MissingVersion,

    /// The declared version is not supported.
    #[error("unsupported manifest version {0}")]
    UnsupportedVersion(String),

    /// A key the manifest layout does not define, usually a typo.
    #[error("unknown property: '{property}'.{}", did_you_mean(.suggestion))]
    UnknownProperty {
        property: String,
        /// The closest known key, if any is close enough.
        suggestion: Option<String>,
    },

    /// The manifest declares nothing to register.
    #[error("manifest declares no services, workflows, tools, or notebooks")]
    Empty,
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(known) => format!(" Did you mean: '{}'?", known),
        None => String::new(),
    }
}

/// Turns raw manifest bytes into a [`Manifest`].
pub trait ManifestResolver: Send + Sync {
    fn resolve(&self, content: &[u8]) -> Result<Manifest, ManifestError>;
}

/// An author as declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestAuthor {
    pub name: Option<String>,
    pub orcid: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub affiliation: Option<String>,
}

impl ManifestAuthor {
    /// Converts to a plain author. Authors without a name have no plain form.
    pub fn to_author(&self) -> Option<Author> {
        self.name.as_ref().map(|name| Author {
            name: name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            affiliation: self.affiliation.clone(),
        })
    }
}

/// Settings every unit kind shares.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitSettings {
    pub name: Option<String>,
    pub primary_descriptor_path: Option<String>,
    pub test_parameter_files: Vec<String>,
    pub readme_path: Option<String>,
    /// Further files to index (service `files`, notebook `otherFiles`).
    pub files: Vec<String>,
    pub publish: Option<bool>,
    pub latest_tag_as_default: bool,
    /// `Some("")` explicitly clears a manual topic; `None` leaves it alone.
    pub topic: Option<String>,
    pub enable_auto_dois: Option<bool>,
    pub authors: Vec<ManifestAuthor>,
    pub filters: Filters,
}

/// One manifest-declared unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredUnit {
    Service {
        subclass: String,
        settings: UnitSettings,
    },
    Workflow {
        subclass: String,
        settings: UnitSettings,
    },
    Tool {
        subclass: String,
        settings: UnitSettings,
    },
    Notebook {
        format: String,
        language: String,
        settings: UnitSettings,
    },
}

impl DeclaredUnit {
    pub fn kind(&self) -> EntryKind {
        match self {
            DeclaredUnit::Service { .. } => EntryKind::Service,
            DeclaredUnit::Workflow { .. } => EntryKind::Workflow,
            DeclaredUnit::Tool { .. } => EntryKind::Tool,
            DeclaredUnit::Notebook { .. } => EntryKind::Notebook,
        }
    }

    pub fn settings(&self) -> &UnitSettings {
        match self {
            DeclaredUnit::Service { settings, .. }
            | DeclaredUnit::Workflow { settings, .. }
            | DeclaredUnit::Tool { settings, .. }
            | DeclaredUnit::Notebook { settings, .. } => settings,
        }
    }

    /// The declared name, with an empty name treated as absent.
    pub fn name(&self) -> Option<&str> {
        self.settings().name.as_deref().filter(|n| !n.is_empty())
    }

    /// The `(descriptor_language, descriptor_subclass)` pair an entry for
    /// this unit must carry.
    pub fn descriptor(&self) -> (String, String) {
        match self {
            DeclaredUnit::Service { subclass, .. } => {
                (SERVICE_LANGUAGE.to_string(), subclass.to_lowercase())
            }
            DeclaredUnit::Workflow { subclass, .. } | DeclaredUnit::Tool { subclass, .. } => (
                subclass.to_uppercase(),
                NOT_APPLICABLE_SUBCLASS.to_string(),
            ),
            DeclaredUnit::Notebook {
                format, language, ..
            } => (format.to_lowercase(), language.to_lowercase()),
        }
    }

    /// Human-readable label for logs and audit messages.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => format!("{} '{}'", self.kind(), name),
            None => self.kind().to_string(),
        }
    }

    /// Checks the declared shape of the unit for its kind.
    pub fn validate(&self) -> Result<(), String> {
        let settings = self.settings();
        if let Some(name) = self.name() {
            if name.len() > MAX_NAME_LENGTH {
                return Err(format!(
                    "name '{}' is longer than {} characters",
                    name, MAX_NAME_LENGTH
                ));
            }
            if !NAME_PATTERN.is_match(name) {
                return Err(format!(
                    "name '{}' may only contain letters, digits, and single '-' or '_' separators",
                    name
                ));
            }
        }

        match self {
            DeclaredUnit::Service { subclass, .. } => {
                if self.name().is_some() {
                    return Err("a service cannot declare a name".to_string());
                }
                if subclass.trim().is_empty() {
                    return Err("a service must declare a subclass".to_string());
                }
                Ok(())
            }
            DeclaredUnit::Workflow { subclass, .. } | DeclaredUnit::Tool { subclass, .. } => {
                if subclass.trim().is_empty() {
                    return Err(format!("a {} must declare a subclass", self.kind()));
                }
                require_absolute_descriptor(settings, self.kind())
            }
            DeclaredUnit::Notebook {
                format, language, ..
            } => {
                if format.trim().is_empty() || language.trim().is_empty() {
                    return Err("a notebook must declare a format and a language".to_string());
                }
                require_absolute_descriptor(settings, self.kind())
            }
        }
    }
}

fn require_absolute_descriptor(settings: &UnitSettings, kind: EntryKind) -> Result<(), String> {
    match settings.primary_descriptor_path.as_deref() {
        Some(path) if path.starts_with('/') => Ok(()),
        Some(path) => Err(format!(
            "primary descriptor path '{}' of the {} must be absolute",
            path, kind
        )),
        None => Err(format!("a {} must declare a primary descriptor path", kind)),
    }
}

/// A parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    pub version: String,
    /// Declared units in reconciliation order: service, workflows, tools, notebooks.
    pub units: Vec<DeclaredUnit>,
}
