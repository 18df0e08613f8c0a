//! YAML manifest resolver for `.dockstore.yml` versions 1.1 and 1.2.
//!
//! ```yaml
//! version: 1.2
//! workflows:
//!   - name: align
//!     subclass: CWL
//!     primaryDescriptorPath: /align.cwl
//!     testParameterFiles: [/test.json]
//!     publish: true
//!     latestTagAsDefault: true
//!     filters:
//!       branches: [main]
//!       tags: [/v.*/]
//! ```
//!
//! A 1.1 manifest declares a single service whose subclass is given as
//! `type`. It is read into the 1.2 model. Keys outside the layout of the
//! declared version are rejected with the closest known key as a hint.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::filters::Filters;
use super::{DeclaredUnit, Manifest, ManifestAuthor, ManifestError, ManifestResolver, UnitSettings};

/// Version recorded for every parsed manifest; 1.1 documents are converted.
pub const CURRENT_VERSION: &str = "1.2";

/// Parses `.dockstore.yml` manifests with `serde_yaml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlManifestResolver;

impl ManifestResolver for YamlManifestResolver {
    fn resolve(&self, content: &[u8]) -> Result<Manifest, ManifestError> {
        let text = std::str::from_utf8(content).map_err(|_| ManifestError::NotUtf8)?;
        parse_manifest(text)
    }
}

/// Parses a manifest document.
pub fn parse_manifest(text: &str) -> Result<Manifest, ManifestError> {
    let document: Value = serde_yaml::from_str(text)?;

    let version = match document.get("version") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) | None => return Err(ManifestError::MissingVersion),
    };

    let units = match version.as_str() {
        "1.2" => {
            check_properties(&document, &LAYOUT_1_2)?;
            let raw: RawManifest = serde_yaml::from_value(document)?;
            raw.into_units()
        }
        "1.1" => {
            check_properties(&document, &LAYOUT_1_1)?;
            let raw: RawManifest11 = serde_yaml::from_value(document)?;
            raw.into_units()
        }
        _ => return Err(ManifestError::UnsupportedVersion(version)),
    };

    if units.is_empty() {
        return Err(ManifestError::Empty);
    }
    Ok(Manifest {
        version: CURRENT_VERSION.to_string(),
        units,
    })
}

// ─── Known properties ───

const FILTER_KEYS: &[&str] = &["branches", "tags"];

const AUTHOR_KEYS: &[&str] = &["name", "orcid", "email", "role", "affiliation"];

const WORKFLOW_KEYS: &[&str] = &[
    "name",
    "subclass",
    "primaryDescriptorPath",
    "readMePath",
    "topic",
    "enableAutoDois",
    "publish",
    "latestTagAsDefault",
    "filters",
    "authors",
    "testParameterFiles",
];

const NOTEBOOK_KEYS: &[&str] = &[
    "name",
    "format",
    "language",
    "path",
    "kernel",
    "readMePath",
    "publish",
    "latestTagAsDefault",
    "filters",
    "authors",
    "testParameterFiles",
    "otherFiles",
];

const SERVICE_KEYS_1_2: &[&str] = &[
    "subclass",
    "name",
    "author",
    "authors",
    "description",
    "publish",
    "files",
    "filters",
    "scripts",
    "environment",
    "data",
    "latestTagAsDefault",
];

const SERVICE_KEYS_1_1: &[&str] = &[
    "type",
    "name",
    "author",
    "authors",
    "description",
    "publish",
    "files",
    "filters",
    "scripts",
    "environment",
    "data",
    "latestTagAsDefault",
];

/// Where units may appear in a manifest version, and which keys they take.
struct Layout {
    top: &'static [&'static str],
    service: &'static [&'static str],
    /// Sections holding a list of units.
    lists: &'static [(&'static str, &'static [&'static str])],
}

const LAYOUT_1_2: Layout = Layout {
    top: &["version", "service", "workflows", "tools", "notebooks"],
    service: SERVICE_KEYS_1_2,
    lists: &[
        ("workflows", WORKFLOW_KEYS),
        ("tools", WORKFLOW_KEYS),
        ("notebooks", NOTEBOOK_KEYS),
    ],
};

const LAYOUT_1_1: Layout = Layout {
    top: &["version", "service"],
    service: SERVICE_KEYS_1_1,
    lists: &[],
};

/// Rejects the first key the layout does not define. Values of the wrong
/// shape are left for deserialization to report.
fn check_properties(document: &Value, layout: &Layout) -> Result<(), ManifestError> {
    let Some(top) = document.as_mapping() else {
        return Ok(());
    };
    check_keys(top, layout.top)?;

    if let Some(service) = top.get("service").and_then(Value::as_mapping) {
        check_unit(service, layout.service)?;
    }
    for (section, keys) in layout.lists {
        let Some(units) = top.get(*section).and_then(Value::as_sequence) else {
            continue;
        };
        for unit in units.iter().filter_map(Value::as_mapping) {
            check_unit(unit, keys)?;
        }
    }
    Ok(())
}

fn check_unit(unit: &Mapping, keys: &[&str]) -> Result<(), ManifestError> {
    check_keys(unit, keys)?;
    if let Some(filters) = unit.get("filters").and_then(Value::as_mapping) {
        check_keys(filters, FILTER_KEYS)?;
    }
    if let Some(authors) = unit.get("authors").and_then(Value::as_sequence) {
        for author in authors.iter().filter_map(Value::as_mapping) {
            check_keys(author, AUTHOR_KEYS)?;
        }
    }
    Ok(())
}

fn check_keys(mapping: &Mapping, known: &[&str]) -> Result<(), ManifestError> {
    for key in mapping.keys().filter_map(Value::as_str) {
        if !known.contains(&key) {
            return Err(ManifestError::UnknownProperty {
                property: key.to_string(),
                suggestion: closest(key, known).map(str::to_string),
            });
        }
    }
    Ok(())
}

/// The known key with the smallest edit distance to `key`, provided fewer
/// edits are needed than `key` has characters.
fn closest<'k>(key: &str, known: &[&'k str]) -> Option<&'k str> {
    known
        .iter()
        .map(|candidate| (edit_distance(key, candidate), *candidate))
        .min_by_key(|(distance, _)| *distance)
        .filter(|(distance, _)| *distance < key.chars().count())
        .map(|(_, candidate)| candidate)
}

/// Levenshtein distance over characters.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

// ─── Raw document layout ───

#[derive(Debug, Deserialize)]
struct RawManifest {
    service: Option<RawSubclassed>,
    #[serde(default)]
    workflows: Vec<RawSubclassed>,
    #[serde(default)]
    tools: Vec<RawSubclassed>,
    #[serde(default)]
    notebooks: Vec<RawNotebook>,
}

impl RawManifest {
    fn into_units(self) -> Vec<DeclaredUnit> {
        let mut units = Vec::new();
        if let Some(service) = self.service {
            let (subclass, settings) = service.into_parts();
            units.push(DeclaredUnit::Service { subclass, settings });
        }
        for workflow in self.workflows {
            let (subclass, settings) = workflow.into_parts();
            units.push(DeclaredUnit::Workflow { subclass, settings });
        }
        for tool in self.tools {
            let (subclass, settings) = tool.into_parts();
            units.push(DeclaredUnit::Tool { subclass, settings });
        }
        for notebook in self.notebooks {
            units.push(DeclaredUnit::Notebook {
                format: notebook.format,
                language: notebook.language,
                settings: notebook.unit.into_settings(),
            });
        }
        units
    }
}

/// A 1.1 manifest: one service, typed by `type`.
#[derive(Debug, Deserialize)]
struct RawManifest11 {
    service: Option<RawService11>,
}

impl RawManifest11 {
    fn into_units(self) -> Vec<DeclaredUnit> {
        self.service
            .map(|service| DeclaredUnit::Service {
                subclass: service.service_type,
                settings: service.unit.into_settings(),
            })
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawService11 {
    #[serde(rename = "type", default)]
    service_type: String,
    #[serde(flatten)]
    unit: RawUnit,
}

#[derive(Debug, Deserialize)]
struct RawSubclassed {
    #[serde(default)]
    subclass: String,
    #[serde(flatten)]
    unit: RawUnit,
}

impl RawSubclassed {
    fn into_parts(self) -> (String, UnitSettings) {
        (self.subclass, self.unit.into_settings())
    }
}

#[derive(Debug, Deserialize)]
struct RawNotebook {
    #[serde(default = "default_notebook_format")]
    format: String,
    #[serde(default = "default_notebook_language")]
    language: String,
    #[serde(flatten)]
    unit: RawUnit,
}

fn default_notebook_format() -> String {
    "jupyter".to_string()
}

fn default_notebook_language() -> String {
    "python".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUnit {
    name: Option<String>,
    #[serde(alias = "path")]
    primary_descriptor_path: Option<String>,
    #[serde(default)]
    test_parameter_files: Vec<String>,
    read_me_path: Option<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    other_files: Vec<String>,
    publish: Option<bool>,
    #[serde(default)]
    latest_tag_as_default: bool,
    topic: Option<String>,
    enable_auto_dois: Option<bool>,
    #[serde(default)]
    authors: Vec<RawAuthor>,
    #[serde(default)]
    filters: RawFilters,
}

impl RawUnit {
    fn into_settings(self) -> UnitSettings {
        let mut files = self.files;
        files.extend(self.other_files);
        UnitSettings {
            name: self.name,
            primary_descriptor_path: self.primary_descriptor_path,
            test_parameter_files: self.test_parameter_files,
            readme_path: self.read_me_path,
            files,
            publish: self.publish,
            latest_tag_as_default: self.latest_tag_as_default,
            topic: self.topic,
            enable_auto_dois: self.enable_auto_dois,
            authors: self.authors.into_iter().map(RawAuthor::into_author).collect(),
            filters: Filters {
                branches: self.filters.branches,
                tags: self.filters.tags,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawFilters {
    #[serde(default)]
    branches: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    name: Option<String>,
    orcid: Option<String>,
    email: Option<String>,
    role: Option<String>,
    affiliation: Option<String>,
}

impl RawAuthor {
    fn into_author(self) -> ManifestAuthor {
        ManifestAuthor {
            name: self.name,
            orcid: self.orcid,
            email: self.email,
            role: self.role,
            affiliation: self.affiliation,
        }
    }
}
