//! Nodes: numbered markdown documents with YAML metadata.
//!
//! A node with id `N` is stored as two files under the keg root:
//!
//! - `N/README.md` - markdown body, the first heading is the title
//! - `N/meta.yaml` - optional metadata (`tags`, `date`, `author`, `links`, `backlinks`)

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use keg_storage::NodeId;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Markdown body of a node.
pub const CONTENT_FILE: &str = "README.md";

/// Metadata of a node.
pub const META_FILE: &str = "meta.yaml";

/// First ATX heading line. Spaces only after the hashes, so the match never
/// spans lines.
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+[ \t]+(.+)$").unwrap());

/// Relative link to a sibling node, e.g. `](../12)`.
static NODE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\]\(\.\./(\d+)/?\)").unwrap());

/// Title of a markdown document: the text of its first heading line.
///
/// Inline markup is kept as written. Returns an empty string when the
/// document has no heading.
///
/// # Examples
///
/// ```
/// use keg_core::extract_title;
///
/// assert_eq!(extract_title("# Title with [link](../0)\n"), "Title with [link](../0)");
/// assert_eq!(extract_title("no heading"), "");
/// ```
#[must_use]
pub fn extract_title(content: &str) -> &str {
    TITLE_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map_or("", |m| m.as_str().trim_end())
}

/// Node ids linked from `content` with `](../<id>)`, in order of first
/// occurrence.
#[must_use]
pub fn extract_links(content: &str) -> Vec<NodeId> {
    let mut links = Vec::new();
    for caps in NODE_LINK_RE.captures_iter(content) {
        if let Ok(id) = caps[1].parse::<NodeId>()
            && !links.contains(&id)
        {
            links.push(id);
        }
    }
    links
}

/// Metadata of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Tags attached to the node.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// When the node was last changed.
    pub date: DateTime<Utc>,
    /// Nodes this node links to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<NodeId>,
    /// Nodes linking to this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backlinks: Vec<NodeId>,
    /// Author identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Default for NodeMeta {
    fn default() -> Self {
        Self {
            tags: BTreeSet::new(),
            date: DateTime::from(UNIX_EPOCH),
            links: Vec::new(),
            backlinks: Vec::new(),
            author: None,
        }
    }
}

impl NodeMeta {
    /// Metadata dated `date`.
    #[must_use]
    pub fn dated(date: DateTime<Utc>) -> Self {
        Self {
            date,
            ..Self::default()
        }
    }

    /// Add tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// `meta.yaml` as stored. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaFile {
    tags: BTreeSet<String>,
    date: Option<DateTime<Utc>>,
    links: Vec<NodeId>,
    backlinks: Vec<NodeId>,
    author: Option<String>,
}

/// A parsed node. Immutable; edits produce a new value.
///
/// `meta().links` is the union of the links declared in `meta.yaml` and the
/// links found in the current body. Only the declared ones are written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    id: NodeId,
    title: String,
    content: String,
    meta: NodeMeta,
    #[serde(skip)]
    declared_links: Vec<NodeId>,
}

impl Node {
    /// Build a node from its body and metadata.
    ///
    /// `meta.links` are taken as the declared links. The title and the body
    /// links are derived from `content`.
    pub fn new(id: NodeId, content: impl Into<String>, meta: NodeMeta) -> Self {
        let declared_links = meta.links.clone();
        Self::assemble(id, content.into(), meta, declared_links)
    }

    fn assemble(id: NodeId, content: String, mut meta: NodeMeta, declared: Vec<NodeId>) -> Self {
        let mut links = declared.clone();
        for link in extract_links(&content) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        meta.links = links;
        Self {
            id,
            title: extract_title(&content).to_owned(),
            content,
            meta,
            declared_links: declared,
        }
    }

    /// Parse a node from its stored files.
    ///
    /// An absent or blank `meta_yaml` means default metadata. Without a
    /// `date` in the metadata, the node is dated `fallback_date`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when `meta_yaml` is present but malformed.
    pub fn parse(
        id: NodeId,
        content: String,
        meta_yaml: Option<&str>,
        fallback_date: DateTime<Utc>,
    ) -> Result<Self, ParseError> {
        let raw = match meta_yaml.map(str::trim) {
            Some(text) if !text.is_empty() => serde_yaml::from_str::<MetaFile>(text)
                .map_err(|e| ParseError::malformed_meta(id, e))?,
            _ => MetaFile::default(),
        };

        let meta = NodeMeta {
            tags: raw.tags,
            date: raw.date.unwrap_or(fallback_date),
            links: raw.links,
            backlinks: raw.backlinks,
            author: raw.author,
        };
        Ok(Self::new(id, content, meta))
    }

    /// Node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Text of the first heading, or empty.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Raw markdown body.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Node metadata.
    #[must_use]
    pub fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    /// Links listed in `meta.yaml`, without those found in the body.
    #[must_use]
    pub fn declared_links(&self) -> &[NodeId] {
        &self.declared_links
    }

    /// A copy of this node with a new body.
    ///
    /// Links that came only from the old body are dropped.
    #[must_use]
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self::assemble(
            self.id,
            content.into(),
            self.meta.clone(),
            self.declared_links.clone(),
        )
    }

    /// A copy of this node with new metadata.
    ///
    /// Links in `meta.links` that this node only has because its body
    /// mentions them stay derived from the body and are not declared.
    #[must_use]
    pub fn with_meta(&self, meta: NodeMeta) -> Self {
        let body_links = extract_links(&self.content);
        let declared = meta
            .links
            .iter()
            .copied()
            .filter(|id| self.declared_links.contains(id) || !body_links.contains(id))
            .collect();
        Self::assemble(self.id, self.content.clone(), meta, declared)
    }

    /// Encode the metadata as `meta.yaml`, with only the declared links.
    pub(crate) fn meta_yaml(&self) -> Result<String, serde_yaml::Error> {
        let stored = NodeMeta {
            links: self.declared_links.clone(),
            ..self.meta.clone()
        };
        serde_yaml::to_string(&stored)
    }
}
