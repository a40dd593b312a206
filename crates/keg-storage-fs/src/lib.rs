//! Filesystem storage backend for keg knowledge bases.
//!
//! This crate provides [`FsStorage`], a filesystem implementation of the
//! [`Storage`](keg_storage::Storage) trait. It handles:
//!
//! - Mapping slash-separated storage paths onto a root directory
//! - Atomic replacement of files (temporary file + rename)
//! - File watching with event debouncing
//! - Discovery of the nearest keg root above a directory
//!
//! # Example
//!
//! ```no_run
//! use keg_storage::Storage;
//! use keg_storage_fs::{FsStorage, find_nearest_keg_root};
//!
//! let cwd = std::env::current_dir()?;
//! if let Some(root) = find_nearest_keg_root(&cwd) {
//!     let storage = FsStorage::new(root);
//!     for id in storage.list_nodes()? {
//!         println!("{id}");
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod debouncer;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecursiveMode, Watcher};

use debouncer::EventDebouncer;
use keg_storage::{
    RejectedScope, Stat, Storage, StorageError, StorageErrorKind, StorageEventKind,
    StorageEventReceiver, WatchHandle, path,
};

/// Backend identifier for error messages.
const BACKEND: &str = "Fs";

/// Name of the manifest file that marks a keg root.
pub const MANIFEST_FILE: &str = "keg";

/// Quiet period before a burst of notifications is reported.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Create a storage error from a notify error.
fn notify_error(e: notify::Error) -> StorageError {
    StorageError::new(StorageErrorKind::Other)
        .with_backend(BACKEND)
        .with_source(e)
}

fn io_error(e: io::Error, path: &str) -> StorageError {
    StorageError::io(e, Some(PathBuf::from(path))).with_backend(BACKEND)
}

/// Errors that mean "nothing stored at this path".
fn is_absent(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory
    )
}

/// Convert a `notify::EventKind` to a `StorageEventKind`.
///
/// Returns `None` for event kinds that are not relevant (e.g., Access).
fn storage_event_kind(kind: notify::EventKind) -> Option<StorageEventKind> {
    match kind {
        notify::EventKind::Create(_) => Some(StorageEventKind::Created),
        notify::EventKind::Modify(_) => Some(StorageEventKind::Modified),
        notify::EventKind::Remove(_) => Some(StorageEventKind::Removed),
        _ => None,
    }
}

/// Convert an absolute event path to a storage path below one of `roots`.
///
/// Hidden segments (temporary files, `.git`) are not reported.
fn relative_event_path(path: &Path, roots: &[PathBuf]) -> Option<String> {
    let rel = roots.iter().find_map(|root| path.strip_prefix(root).ok())?;
    let segments: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if segments.is_empty() || segments.iter().any(|s| s.starts_with('.')) {
        return None;
    }
    Some(segments.join("/"))
}

/// Filesystem-backed storage rooted at a directory.
///
/// Storage paths are joined onto the root segment by segment, so `"12/README.md"`
/// maps to `<root>/12/README.md` on every platform.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Create storage rooted at `root`. The directory does not need to exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this storage.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage path to a filesystem path below the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let normalized = path::normalize(path).map_err(|e| e.with_backend(BACKEND))?;
        Ok(normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> Result<Option<String>, StorageError> {
        let full_path = self.resolve(path)?;
        match fs::read_to_string(&full_path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(io_error(e, path)),
        }
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        let Some(parent) = full_path.parent().filter(|_| full_path != self.root) else {
            return Err(StorageError::invalid_path(path).with_backend(BACKEND));
        };
        fs::create_dir_all(parent).map_err(|e| io_error(e, path))?;

        // The temporary file lives next to the target so the rename stays on
        // one filesystem and replaces the old content in a single step.
        let mut tmp = tempfile::Builder::new()
            .prefix(".keg-")
            .tempfile_in(parent)
            .map_err(|e| io_error(e, path))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| io_error(e, path))?;
        tmp.persist(&full_path).map_err(|e| io_error(e.error, path))?;

        tracing::debug!(path, bytes = content.len(), "Wrote file");
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Option<Stat>, StorageError> {
        let full_path = self.resolve(path)?;
        let metadata = match fs::metadata(&full_path) {
            Ok(metadata) => metadata,
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(io_error(e, path)),
        };
        let modified = metadata.modified().map_err(|e| io_error(e, path))?;
        Ok(Some(Stat {
            modified_at: DateTime::<Utc>::from(modified),
        }))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if is_absent(&e) => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e, "")),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(e, ""))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn child(&self, path: &str) -> Arc<dyn Storage> {
        match self.resolve(path) {
            Ok(root) => Arc::new(Self::new(root)),
            Err(_) => Arc::new(RejectedScope::new(path, BACKEND)),
        }
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn watch(&self) -> Result<(StorageEventReceiver, WatchHandle), StorageError> {
        let (event_tx, event_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let debouncer = Arc::new(EventDebouncer::new(DEBOUNCE));

        // notify may report canonical paths, so match against both forms.
        let mut roots = vec![self.root.clone()];
        if let Ok(canonical) = fs::canonicalize(&self.root)
            && canonical != self.root
        {
            roots.push(canonical);
        }

        let watcher_debouncer = Arc::clone(&debouncer);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let Some(kind) = storage_event_kind(event.kind) else {
                return;
            };
            for path in event.paths {
                if let Some(rel) = relative_event_path(&path, &roots) {
                    watcher_debouncer.record(rel, kind);
                }
            }
        })
        .map_err(notify_error)?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(notify_error)?;

        tracing::debug!(root = %self.root.display(), "Watching keg directory");

        // Spawn drain thread. The watcher is moved in to keep it alive.
        std::thread::spawn(move || {
            let _watcher = watcher;

            loop {
                match shutdown_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }

                for event in debouncer.drain_ready() {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        // When dropped, shutdown_tx disconnects, causing the drain thread to exit
        Ok((
            StorageEventReceiver::new(event_rx),
            WatchHandle::new(shutdown_tx),
        ))
    }
}

/// Walk from `start_dir` up through its parents and return the first
/// directory containing a keg manifest.
///
/// Returns `None` when no ancestor is a keg root.
pub fn find_nearest_keg_root(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .find(|dir| dir.join(MANIFEST_FILE).is_file())
        .map(Path::to_path_buf)
}
