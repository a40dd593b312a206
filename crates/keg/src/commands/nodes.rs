//! `keg nodes` command implementation.

use chrono::{DateTime, Utc};
use clap::Args;
use keg_core::Node;
use keg_storage::NodeId;
use serde::Serialize;

use crate::context::Context;
use crate::error::CliError;
use crate::output::{Format, Output};

/// Arguments for the nodes command.
#[derive(Args)]
pub(crate) struct NodesArgs {
    /// Keg alias (default: the configured default keg).
    #[arg(short = 'k', long = "keg", value_name = "ALIAS")]
    keg: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t)]
    format: Format,
}

/// One listed node.
#[derive(Debug, Serialize)]
struct NodeSummary {
    id: NodeId,
    title: String,
    updated: DateTime<Utc>,
    tags: Vec<String>,
}

impl From<Node> for NodeSummary {
    fn from(node: Node) -> Self {
        Self {
            id: node.id(),
            title: node.title().to_owned(),
            updated: node.meta().date,
            tags: node.meta().tags.iter().cloned().collect(),
        }
    }
}

impl NodesArgs {
    /// Execute the nodes command.
    ///
    /// # Errors
    ///
    /// Returns an error if the keg can't be loaded or listed.
    pub(crate) fn execute(self, ctx: &mut Context, output: &Output) -> Result<(), CliError> {
        let alias = ctx.alias(self.keg)?;
        let keg = ctx.backend.load_keg(&alias, &ctx.config)?;

        let mut nodes = Vec::new();
        for node in keg.nodes()? {
            match node {
                Ok(node) => nodes.push(NodeSummary::from(node)),
                Err(e) => output.warning(&format!("Warning: {e}")),
            }
        }

        if let Some(document) = self.format.encode(&nodes)? {
            return output.document(&document);
        }
        for node in &nodes {
            output.result(&format!(
                "{}\t{}\t{}",
                node.id,
                node.updated.format("%Y-%m-%d"),
                node.title
            ))?;
        }
        output.muted(&format!("{} node(s) in {alias}", nodes.len()));
        Ok(())
    }
}
