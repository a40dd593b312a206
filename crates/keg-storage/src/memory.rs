//! In-memory storage backend.
//!
//! Provides [`MemoryStorage`], used for tests and headless environments.
//! Every view created by [`Storage::child`] shares one backing map.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, mpsc};

use chrono::{DateTime, Utc};

use crate::event::{StorageEvent, StorageEventKind, StorageEventReceiver, WatchHandle};
use crate::path;
use crate::rejected::RejectedScope;
use crate::storage::{Stat, Storage, StorageError};

const BACKEND: &str = "Memory";

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    modified_at: DateTime<Utc>,
}

struct Watcher {
    scope: String,
    tx: mpsc::Sender<StorageEvent>,
    shutdown: mpsc::Receiver<()>,
}

impl Watcher {
    /// A watcher is gone once its handle or its receiver has been dropped.
    fn is_closed(&self) -> bool {
        matches!(
            self.shutdown.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        )
    }
}

#[derive(Default)]
struct Shared {
    files: RwLock<BTreeMap<String, Entry>>,
    watchers: Mutex<Vec<Watcher>>,
}

impl Shared {
    fn notify(&self, key: &str, kind: StorageEventKind) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|watcher| {
            if watcher.is_closed() {
                return false;
            }
            let Some(relative) = strip_scope(&watcher.scope, key) else {
                return true;
            };
            watcher
                .tx
                .send(StorageEvent {
                    path: relative.to_owned(),
                    kind,
                })
                .is_ok()
        });
    }
}

fn strip_scope<'a>(scope: &str, key: &'a str) -> Option<&'a str> {
    if scope.is_empty() {
        return Some(key);
    }
    key.strip_prefix(scope)?.strip_prefix('/')
}

/// Storage that keeps every entry in process memory.
///
/// Paths map to entries in a shared `BTreeMap`. A child view prefixes all of
/// its paths with its scope, so two views see the same bytes wherever their
/// paths overlap.
///
/// # Example
///
/// ```
/// use keg_storage::{MemoryStorage, Storage};
///
/// let storage = MemoryStorage::new()
///     .with_file("keg", "title: Notes\n")
///     .with_file("1/README.md", "# First\n");
///
/// assert_eq!(storage.read("1/README.md").unwrap().as_deref(), Some("# First\n"));
/// assert_eq!(storage.list_nodes().unwrap().count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    scope: String,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl MemoryStorage {
    /// Create a new empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file modified "now".
    ///
    /// # Panics
    ///
    /// Panics if `path` contains a `..` segment.
    #[must_use]
    pub fn with_file(self, path: &str, content: impl Into<String>) -> Self {
        self.with_file_at(path, content, Utc::now())
    }

    /// Add a file with an explicit modification time.
    ///
    /// # Panics
    ///
    /// Panics if `path` contains a `..` segment.
    #[must_use]
    pub fn with_file_at(
        self,
        path: &str,
        content: impl Into<String>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let key = self.key(path).expect("valid path in test fixture");
        self.insert(key, content.into(), modified_at);
        self
    }

    /// Remove the entry at `path`, notifying watchers.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&self, path: &str) -> Result<bool, StorageError> {
        let key = self.key(path)?;
        let removed = self
            .shared
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some();
        if removed {
            self.shared.notify(&key, StorageEventKind::Removed);
        }
        Ok(removed)
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        let normalized =
            path::normalize(path).map_err(|e| e.with_backend(BACKEND))?;
        Ok(path::join(&self.scope, &normalized))
    }

    fn insert(&self, key: String, content: String, modified_at: DateTime<Utc>) {
        let previous = self
            .shared
            .files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                Entry {
                    content,
                    modified_at,
                },
            );
        let kind = if previous.is_some() {
            StorageEventKind::Modified
        } else {
            StorageEventKind::Created
        };
        self.shared.notify(&key, kind);
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<Option<String>, StorageError> {
        let key = self.key(path)?;
        let files = self
            .shared
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(&key).map(|entry| entry.content.clone()))
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let key = self.key(path)?;
        if key.is_empty() {
            return Err(StorageError::invalid_path(path).with_backend(BACKEND));
        }
        tracing::debug!(path = %key, bytes = content.len(), "Memory write");
        self.insert(key, content.to_owned(), Utc::now());
        Ok(())
    }

    /// Files report their own time. A directory reports the newest time
    /// found below it.
    fn stat(&self, path: &str) -> Result<Option<Stat>, StorageError> {
        let key = self.key(path)?;
        let files = self
            .shared
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = files.get(&key) {
            return Ok(Some(Stat {
                modified_at: entry.modified_at,
            }));
        }
        let newest = files
            .iter()
            .filter(|(k, _)| strip_scope(&key, k).is_some_and(|rest| !rest.is_empty()))
            .map(|(_, entry)| entry.modified_at)
            .max();
        Ok(newest.map(|modified_at| Stat { modified_at }))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let files = self
            .shared
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let names: BTreeSet<&str> = files
            .keys()
            .filter_map(|key| path::first_segment_under(&self.scope, key))
            .collect();
        Ok(names.into_iter().map(str::to_owned).collect())
    }

    fn child(&self, path: &str) -> Arc<dyn Storage> {
        match self.key(path) {
            Ok(scope) => Arc::new(Self {
                shared: Arc::clone(&self.shared),
                scope,
            }),
            Err(_) => Arc::new(RejectedScope::new(path, BACKEND)),
        }
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn watch(&self) -> Result<(StorageEventReceiver, WatchHandle), StorageError> {
        let (tx, rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        self.shared
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Watcher {
                scope: self.scope.clone(),
                tx,
                shutdown: shutdown_rx,
            });
        Ok((StorageEventReceiver::new(rx), WatchHandle::new(shutdown_tx)))
    }
}
