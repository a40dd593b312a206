//! Tag to node id mapping.

use std::collections::BTreeMap;

use keg_storage::NodeId;

use crate::dex::{IndexPlugin, PluginError, PluginErrorKind, UpdateStatus, update_artifact};
use crate::keg::Keg;
use crate::node::Node;

/// Writes a YAML mapping of every tag to the ascending ids carrying it.
#[derive(Debug, Default)]
pub struct TagsPlugin;

impl TagsPlugin {
    /// Index name.
    pub const NAME: &'static str = "tags";
}

fn index(nodes: &[Node]) -> BTreeMap<&str, Vec<NodeId>> {
    let mut tags: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
    for node in nodes {
        for tag in &node.meta().tags {
            tags.entry(tag.as_str()).or_default().push(node.id());
        }
    }
    tags
}

impl IndexPlugin for TagsPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn update(&mut self, keg: &Keg) -> Result<UpdateStatus, PluginError> {
        update_artifact(keg, Self::NAME, |nodes| {
            serde_yaml::to_string(&index(&nodes)).map_err(|e| {
                PluginError::new(Self::NAME, PluginErrorKind::Encode(e.to_string()))
            })
        })
    }
}
