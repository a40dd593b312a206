//! Kegs, their derived indexes and search.
//!
//! This crate provides:
//! - [`Backend`]: the storages of one runtime environment and alias resolution
//! - [`Keg`]: a loaded manifest with lazy access to its [`Node`]s
//! - [`dex::IndexEngine`]: dependency-ordered index plugins
//! - [`SearchEngine`]: ranked search across kegs
//!
//! # Quick Start
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use keg_config::{KegTarget, ResolvedConfig};
//! use keg_core::{Backend, SearchEngine, SearchFilter};
//! use keg_core::dex::IndexEngine;
//! use keg_storage::MemoryStorage;
//!
//! let root = MemoryStorage::new()
//!     .with_file("kegs/notes/keg", "title: Notes\ncreator: me\nurl: memory:notes\n")
//!     .with_file("kegs/notes/1/README.md", "# First note\n");
//! let backend = Backend::memory_from(&root);
//! let config = ResolvedConfig::default().with_keg("notes", KegTarget::new("memory:notes"));
//!
//! let keg = backend.load_keg("notes", &config)?;
//! let report = IndexEngine::with_builtin().update(&keg)?;
//! assert!(report.is_success());
//!
//! let output = SearchEngine::new(&backend, &config).search(&["notes"], &SearchFilter::text("first"), None)?;
//! assert_eq!(output.results[0].title, "First note");
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod dex;
mod error;
mod keg;
mod keg_file;
mod node;
mod search;

pub use backend::{
    Backend, BackendDirs, BackendError, CONFIG_FILE, KegLoader, LoaderError, LoaderErrorReason,
    ResolveError,
};
pub use error::{KegError, ParseError, ParseErrorKind};
pub use keg::{Keg, Nodes};
pub use keg_file::{Dex, IndexEntry, KegFile, MANIFEST_FILE};
pub use node::{CONTENT_FILE, META_FILE, Node, NodeMeta, extract_links, extract_title};
pub use search::{
    AliasFailure, SearchEngine, SearchError, SearchFilter, SearchOutput, SearchResult,
};
