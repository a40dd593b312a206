//! Reverse-chronological change log.

use std::fmt::Write;

use crate::dex::{DATE_FORMAT, IndexPlugin, PluginError, UpdateStatus, update_artifact};
use crate::keg::Keg;
use crate::node::Node;

/// Writes one markdown list item per node, newest first.
///
/// Nodes with the same date are listed by ascending id.
#[derive(Debug, Default)]
pub struct ChangesPlugin;

impl ChangesPlugin {
    /// Index name.
    pub const NAME: &'static str = "changes";
}

fn render(mut nodes: Vec<Node>) -> String {
    nodes.sort_by(|a, b| {
        b.meta()
            .date
            .cmp(&a.meta().date)
            .then_with(|| a.id().cmp(&b.id()))
    });

    let mut out = String::new();
    for node in &nodes {
        let _ = writeln!(
            out,
            "* {} [{}](../{})",
            node.meta().date.format(DATE_FORMAT),
            node.title(),
            node.id()
        );
    }
    out
}

impl IndexPlugin for ChangesPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn update(&mut self, keg: &Keg) -> Result<UpdateStatus, PluginError> {
        update_artifact(keg, Self::NAME, |nodes| Ok(render(nodes)))
    }
}
