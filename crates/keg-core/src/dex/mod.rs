//! Derived indexes ("dex") and the plugins that build them.
//!
//! Each [`IndexPlugin`] owns one artifact, named after the plugin in the
//! manifest's `indexes` table. Plugins read nodes through the [`Keg`] and
//! write their artifact back through the keg's storage. An artifact is only
//! written when its content changed.
//!
//! [`IndexEngine`] orders plugins by their declared dependencies and runs them
//! one after another.

mod changes;
mod engine;
mod nodes;
mod tags;

use keg_storage::StorageError;

pub use changes::ChangesPlugin;
pub use engine::{IndexEngine, PluginOrder, PluginOutcome, PluginState, UpdateReport};
pub use nodes::NodesPlugin;
pub use tags::TagsPlugin;

use crate::error::KegError;
use crate::keg::Keg;
use crate::node::Node;

/// Timestamp format used in artifacts.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// A unit that derives one dex artifact from the nodes of a keg.
pub trait IndexPlugin: Send {
    /// Plugin name, also the `indexes` key it reads its output path from.
    fn name(&self) -> &str;

    /// Plugins that must run before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Acquire resources before the first update.
    fn activate(&mut self, _keg: &Keg) -> Result<(), PluginError> {
        Ok(())
    }

    /// Rebuild the artifact.
    fn update(&mut self, keg: &Keg) -> Result<UpdateStatus, PluginError>;

    /// Release resources.
    fn deactivate(&mut self) {}
}

/// Result of one plugin update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The manifest declares no index for the plugin.
    NotConfigured,
    /// The stored artifact already had the derived content.
    Unchanged {
        /// Artifact path.
        path: String,
    },
    /// The artifact was written.
    Written {
        /// Artifact path.
        path: String,
    },
}

/// What went wrong inside a plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginErrorKind {
    /// Reading nodes failed.
    #[error(transparent)]
    Keg(#[from] KegError),
    /// Reading or writing the artifact failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The artifact could not be serialized.
    #[error("failed to encode artifact: {0}")]
    Encode(String),
    /// The derivation itself failed.
    #[error("{0}")]
    Derive(String),
}

/// A plugin failed.
#[derive(Debug, thiserror::Error)]
#[error("plugin {plugin} failed: {kind}")]
pub struct PluginError {
    /// Name of the failing plugin.
    pub plugin: String,
    /// Cause.
    pub kind: PluginErrorKind,
}

impl PluginError {
    /// Error raised by `plugin`.
    pub fn new(plugin: impl Into<String>, kind: impl Into<PluginErrorKind>) -> Self {
        Self {
            plugin: plugin.into(),
            kind: kind.into(),
        }
    }
}

/// Plugins can't be ordered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexConfigError {
    /// Dependencies form a cycle.
    #[error("cyclic plugin dependencies: {}", names.join(", "))]
    Cycle {
        /// Plugins that could not be ordered.
        names: Vec<String>,
    },
    /// A plugin depends on a plugin that isn't registered.
    #[error("plugin {plugin} depends on unregistered plugin {dependency}")]
    UnknownDependency {
        /// Declaring plugin.
        plugin: String,
        /// Missing dependency.
        dependency: String,
    },
}

/// Read every node of `keg` for `plugin`, ascending by id.
pub(crate) fn read_nodes(keg: &Keg, plugin: &str) -> Result<Vec<Node>, PluginError> {
    keg.nodes()
        .and_then(|nodes| nodes.collect::<Result<Vec<_>, _>>())
        .map_err(|e| PluginError::new(plugin, e))
}

/// Store `content` at `path` unless it is already there.
pub(crate) fn write_artifact(
    keg: &Keg,
    plugin: &str,
    path: &str,
    content: &str,
) -> Result<UpdateStatus, PluginError> {
    let storage = keg.storage();
    let current = storage
        .read(path)
        .map_err(|e| PluginError::new(plugin, e))?;
    if current.as_deref() == Some(content) {
        tracing::debug!(plugin, path, "Artifact unchanged");
        return Ok(UpdateStatus::Unchanged {
            path: path.to_owned(),
        });
    }

    storage
        .write(path, content)
        .map_err(|e| PluginError::new(plugin, e))?;
    tracing::debug!(plugin, path, bytes = content.len(), "Artifact written");
    Ok(UpdateStatus::Written {
        path: path.to_owned(),
    })
}

/// Shared update flow of the built-in plugins: look up the configured path,
/// derive the artifact, write it if changed.
pub(crate) fn update_artifact(
    keg: &Keg,
    plugin: &str,
    derive: impl FnOnce(Vec<Node>) -> Result<String, PluginError>,
) -> Result<UpdateStatus, PluginError> {
    let Some(entry) = keg.dex().get(plugin) else {
        return Ok(UpdateStatus::NotConfigured);
    };
    let content = derive(read_nodes(keg, plugin)?)?;
    write_artifact(keg, plugin, &entry.file, &content)
}
