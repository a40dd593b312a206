//! Kegs: a manifest plus the nodes stored next to it.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::DateTime;
use keg_storage::{NodeId, NodeIds, Storage, node_path};

use crate::error::{KegError, ParseError};
use crate::keg_file::{Dex, KegFile, MANIFEST_FILE};
use crate::node::{CONTENT_FILE, META_FILE, Node};

/// A loaded keg.
///
/// Holds the decoded manifest and the storage rooted at the keg. Nodes are
/// read on demand.
#[derive(Clone)]
pub struct Keg {
    keg_file: KegFile,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Keg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keg")
            .field("title", &self.keg_file.title)
            .field("backend", &self.storage.backend())
            .finish_non_exhaustive()
    }
}

impl Keg {
    /// Load the keg rooted at `storage`.
    ///
    /// Only the manifest is read.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::Parse`] if the manifest is missing or malformed,
    /// [`KegError::Storage`] if it can't be read.
    pub fn from_storage(storage: Arc<dyn Storage>) -> Result<Self, KegError> {
        let text = storage
            .read(MANIFEST_FILE)?
            .ok_or_else(ParseError::missing_manifest)?;
        let keg_file = KegFile::from_yaml(&text).map_err(ParseError::malformed_manifest)?;
        tracing::debug!(
            keg = %keg_file.title,
            backend = storage.backend(),
            indexes = keg_file.indexes.len(),
            "Loaded keg"
        );
        Ok(Self { keg_file, storage })
    }

    /// Create a keg by writing `keg_file` as the manifest of `storage`.
    ///
    /// # Errors
    ///
    /// Returns error if the manifest can't be encoded or written.
    pub fn create(storage: Arc<dyn Storage>, keg_file: KegFile) -> Result<Self, KegError> {
        let keg = Self { keg_file, storage };
        keg.write_manifest()?;
        Ok(keg)
    }

    /// The manifest.
    #[must_use]
    pub fn keg_file(&self) -> &KegFile {
        &self.keg_file
    }

    /// Indexes declared by the manifest.
    #[must_use]
    pub fn dex(&self) -> Dex<'_> {
        self.keg_file.dex()
    }

    /// Storage rooted at the keg.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Ids of the nodes in the keg, ascending.
    pub fn list_nodes(&self) -> Result<NodeIds, KegError> {
        Ok(self.storage.list_nodes()?)
    }

    /// Read node `id`.
    ///
    /// Returns `Ok(None)` if the node has no `README.md`. A missing or empty
    /// `meta.yaml` yields default metadata dated by the README's
    /// modification time.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::Parse`] if `meta.yaml` is malformed.
    pub fn get_node(&self, id: NodeId) -> Result<Option<Node>, KegError> {
        let content_path = node_path(id, CONTENT_FILE);
        let Some(content) = self.storage.read(&content_path)? else {
            return Ok(None);
        };
        let meta = self.storage.read(&node_path(id, META_FILE))?;

        let fallback_date = match self.storage.stat(&content_path)? {
            Some(stat) => stat.modified_at,
            None => DateTime::from(UNIX_EPOCH),
        };
        Ok(Some(Node::parse(id, content, meta.as_deref(), fallback_date)?))
    }

    /// Lazily read every node, ascending by id.
    ///
    /// Ids are listed up front. Each node is read when the iterator reaches
    /// it, and ids whose README disappeared in between are skipped.
    pub fn nodes(&self) -> Result<Nodes<'_>, KegError> {
        Ok(Nodes {
            keg: self,
            ids: self.list_nodes()?,
        })
    }

    /// Write a node's `README.md` and `meta.yaml`.
    ///
    /// # Errors
    ///
    /// Returns error if the metadata can't be encoded or a write fails.
    pub fn write_node(&self, node: &Node) -> Result<(), KegError> {
        let id = node.id();
        let meta = node.meta_yaml().map_err(|source| KegError::Encode {
            what: node_path(id, META_FILE),
            source,
        })?;
        self.storage
            .write(&node_path(id, CONTENT_FILE), node.content())?;
        self.storage.write(&node_path(id, META_FILE), &meta)?;
        tracing::debug!(keg = %self.keg_file.title, node = %id, "Wrote node");
        Ok(())
    }

    /// Id for a new node: one past the highest existing id.
    ///
    /// An empty keg starts at 1, since node 0 is the keg's own root node.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::IdsExhausted`] when the keg already holds
    /// `u64::MAX`.
    pub fn next_id(&self) -> Result<NodeId, KegError> {
        match self.list_nodes()?.next_back() {
            None => Ok(NodeId::new(1)),
            Some(last) => last.checked_next().ok_or(KegError::IdsExhausted { last }),
        }
    }

    /// Write the manifest back to `keg`.
    pub fn write_manifest(&self) -> Result<(), KegError> {
        let text = self.keg_file.to_yaml().map_err(|source| KegError::Encode {
            what: MANIFEST_FILE.to_owned(),
            source,
        })?;
        self.storage.write(MANIFEST_FILE, &text)?;
        Ok(())
    }

    /// Content of the dex artifact declared as `name`.
    ///
    /// Returns `Ok(None)` if the index isn't declared or hasn't been built.
    pub fn read_index(&self, name: &str) -> Result<Option<String>, KegError> {
        let Some(entry) = self.dex().get(name) else {
            return Ok(None);
        };
        Ok(self.storage.read(&entry.file)?)
    }
}

/// Lazy iterator over the nodes of a [`Keg`].
#[derive(Debug)]
pub struct Nodes<'a> {
    keg: &'a Keg,
    ids: NodeIds,
}

impl Iterator for Nodes<'_> {
    type Item = Result<Node, KegError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.ids.next()?;
            match self.keg.get_node(id) {
                Ok(Some(node)) => return Some(Ok(node)),
                Ok(None) => tracing::debug!(node = %id, "Node without README, skipping"),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.ids.size_hint().1)
    }
}
