//! Tabular listing of every node.

use std::fmt::Write;

use crate::dex::{DATE_FORMAT, IndexPlugin, PluginError, UpdateStatus, update_artifact};
use crate::keg::Keg;
use crate::node::Node;

/// Writes one `<id>\t<date>\t<title>` line per node, ascending by id.
#[derive(Debug, Default)]
pub struct NodesPlugin;

impl NodesPlugin {
    /// Index name.
    pub const NAME: &'static str = "nodes";
}

fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            node.id(),
            node.meta().date.format(DATE_FORMAT),
            node.title()
        );
    }
    out
}

impl IndexPlugin for NodesPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn update(&mut self, keg: &Keg) -> Result<UpdateStatus, PluginError> {
        update_artifact(keg, Self::NAME, |nodes| Ok(render(&nodes)))
    }
}
