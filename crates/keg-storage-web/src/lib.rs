//! Browser-local storage backend for keg knowledge bases.
//!
//! Browsers only offer a flat string-to-string store (the Web Storage API).
//! This crate maps the hierarchical keg path space onto such a store:
//!
//! - [`StorageArea`]: the flat store, with `get_item`/`set_item`/`remove_item`/`keys`
//! - [`MemoryArea`]: in-process area with an optional quota
//! - [`FileArea`]: area persisted as one JSON document, for headless use
//! - [`KvStorage`]: the [`Storage`](keg_storage::Storage) implementation
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use keg_storage::Storage;
//! use keg_storage_web::{KvStorage, MemoryArea};
//!
//! let storage = KvStorage::new(Arc::new(MemoryArea::new()), "keg");
//! storage.write("1/README.md", "# One\n")?;
//!
//! assert_eq!(storage.read("1/README.md")?.as_deref(), Some("# One\n"));
//! # Ok::<(), keg_storage::StorageError>(())
//! ```

mod area;
mod file_area;
mod kv;

pub use area::{AreaError, MemoryArea, StorageArea};
pub use file_area::FileArea;
pub use kv::KvStorage;
