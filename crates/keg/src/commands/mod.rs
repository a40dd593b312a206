//! CLI command implementations.

mod dates;
pub(crate) mod index;
pub(crate) mod nodes;
pub(crate) mod search;

pub(crate) use index::IndexArgs;
pub(crate) use nodes::NodesArgs;
pub(crate) use search::SearchArgs;
