//! Storage abstraction for keg knowledge bases.
//!
//! This crate provides a [`Storage`] trait for reading and writing keg content
//! independently of where it lives. This enables:
//!
//! - **Unit testing** against [`MemoryStorage`] without touching the filesystem
//! - **Backend flexibility** (filesystem, browser-local key/value, remote API)
//! - **Clean separation** between keg logic and I/O operations
//!
//! # Architecture
//!
//! The crate provides:
//! - [`Storage`] trait with `read()`, `write()`, `stat()`, `list()` and `child()`
//! - [`NodeId`] and the lazy [`NodeIds`] sequence returned by `list_nodes()`
//! - [`StorageEvent`] change notifications with RAII [`WatchHandle`]s
//! - [`MemoryStorage`], a shared in-process map
//!
//! Backend crates (`keg-storage-fs`, `keg-storage-web`, `keg-storage-api`)
//! implement the trait on top of these types.
//!
//! # Example
//!
//! ```
//! use keg_storage::{MemoryStorage, Storage};
//!
//! let root = MemoryStorage::new();
//! let keg = root.child("kegs/notes");
//! keg.write("keg", "title: Notes\n")?;
//!
//! assert_eq!(root.read("kegs/notes/keg")?.as_deref(), Some("title: Notes\n"));
//! # Ok::<(), keg_storage::StorageError>(())
//! ```

mod event;
mod memory;
mod node_id;
pub mod path;
mod rejected;
mod storage;

pub use event::{Received, StorageEvent, StorageEventKind, StorageEventReceiver, WatchHandle};
pub use memory::MemoryStorage;
pub use node_id::{NodeId, NodeIds, ParseNodeIdError};
pub use rejected::RejectedScope;
pub use storage::{ErrorStatus, Stat, Storage, StorageError, StorageErrorKind, node_path};
