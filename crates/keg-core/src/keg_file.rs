//! The keg manifest and its declared indexes.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Name of the manifest file at the root of every keg.
pub const MANIFEST_FILE: &str = keg_storage_fs::MANIFEST_FILE;

/// The `keg` manifest.
///
/// Optional fields are left out when encoding, so a decoded manifest encodes
/// back to an equal value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KegFile {
    /// Human-readable keg title.
    pub title: String,
    /// Identity of the author, usually a repository or home page URL.
    pub creator: String,
    /// Canonical remote location of the keg.
    pub url: String,
    /// Manifest format version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kegv: Option<String>,
    /// Last time the keg was updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Lifecycle state, e.g. `living`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// One-paragraph description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Derived indexes in declaration order.
    #[serde(default)]
    pub indexes: IndexMap<String, IndexEntry>,
}

/// One declared dex artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Path of the artifact relative to the keg root.
    pub file: String,
    /// What the artifact lists.
    #[serde(default)]
    pub summary: String,
    /// Hooks that trigger a rebuild of this index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<String>,
}

impl IndexEntry {
    /// Entry for an artifact at `file`.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// Set the summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Add a hook that triggers this index.
    #[must_use]
    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hooks.push(hook.into());
        self
    }

    /// Whether `hook` triggers this index.
    #[must_use]
    pub fn has_hook(&self, hook: &str) -> bool {
        self.hooks.iter().any(|h| h == hook)
    }
}

impl KegFile {
    /// Decode a manifest document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or lacks a required field.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Encode the manifest as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Declare an index, replacing any previous entry with the same name.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, entry: IndexEntry) -> Self {
        self.indexes.insert(name.into(), entry);
        self
    }

    /// The declared indexes.
    #[must_use]
    pub fn dex(&self) -> Dex<'_> {
        Dex {
            indexes: &self.indexes,
        }
    }
}

/// Read-only view of the indexes a manifest declares.
#[derive(Debug, Clone, Copy)]
pub struct Dex<'a> {
    indexes: &'a IndexMap<String, IndexEntry>,
}

impl<'a> Dex<'a> {
    /// Entry declared under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a IndexEntry> {
        self.indexes.get(name)
    }

    /// Entries in declaration order.
    pub fn iter(self) -> impl Iterator<Item = (&'a str, &'a IndexEntry)> + use<'a> {
        self.indexes.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Number of declared indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Whether no index is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}
