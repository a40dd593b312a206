//! The [`Storage`] trait every keg backend implements, and [`StorageError`].
//!
//! # Path Convention
//!
//! All path parameters are slash-separated paths relative to the storage root:
//! - `"keg"` - the keg manifest
//! - `"42/README.md"` - content of node 42
//! - `"dex/tags.yaml"` - a derived index artifact
//!
//! Absence is a value, not an error: [`Storage::read`] and [`Storage::stat`]
//! return `Ok(None)` for paths that do not exist.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::event::{StorageEventReceiver, WatchHandle};
use crate::node_id::{NodeId, NodeIds};

/// File status returned by [`Storage::stat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
}

/// What kind of failure a backend hit.
///
/// Absence of a path is reported as `Ok(None)` by the read operations, so
/// `NotFound` only shows up where a backend can't express absence as a value,
/// e.g. a remote write into a keg the server doesn't know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageErrorKind {
    /// The target doesn't exist.
    NotFound,
    /// The backend refused access.
    PermissionDenied,
    /// The target exists and may not be replaced.
    AlreadyExists,
    /// The path escapes the storage root or is otherwise malformed.
    InvalidPath,
    /// The backend can't be reached or is failing.
    Unavailable,
    /// The backend asked the caller to slow down.
    RateLimited,
    /// The operation didn't finish in time.
    Timeout,
    /// Quota exhausted or any other failure.
    Other,
}

impl StorageErrorKind {
    fn describe(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::AlreadyExists => "already exists",
            Self::InvalidPath => "invalid path",
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate limited",
            Self::Timeout => "timed out",
            Self::Other => "failed",
        }
    }
}

impl From<std::io::ErrorKind> for StorageErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind as Io;
        match kind {
            Io::NotFound => Self::NotFound,
            Io::PermissionDenied | Io::ReadOnlyFilesystem => Self::PermissionDenied,
            Io::AlreadyExists => Self::AlreadyExists,
            Io::InvalidFilename => Self::InvalidPath,
            Io::TimedOut => Self::Timeout,
            _ => Self::Other,
        }
    }
}

/// Whether an operation is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorStatus {
    /// Retrying won't help.
    #[default]
    Permanent,
    /// Retrying right away may succeed.
    Temporary,
    /// Retrying may succeed after backing off.
    Persistent,
}

/// A failed storage operation.
///
/// Built with [`StorageError::new`] and the `with_*` methods. The source
/// error of the backend, if any, is kept for [`std::error::Error::source`].
#[derive(Debug)]
pub struct StorageError {
    /// What went wrong.
    pub kind: StorageErrorKind,
    /// Retry guidance.
    pub status: ErrorStatus,
    /// Path the operation was addressing.
    pub path: Option<PathBuf>,
    /// Name of the backend that failed (see [`Storage::backend`]).
    pub backend: Option<&'static str>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    /// Error of `kind`, permanent until told otherwise.
    #[must_use]
    pub fn new(kind: StorageErrorKind) -> Self {
        Self {
            kind,
            status: ErrorStatus::default(),
            path: None,
            backend: None,
            source: None,
        }
    }

    /// Record the path the operation was addressing.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Record the failing backend.
    #[must_use]
    pub fn with_backend(mut self, backend: &'static str) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Override the retry guidance.
    #[must_use]
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Keep the backend's own error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The backend's own error, if it is an `E`.
    #[must_use]
    pub fn downcast_source<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.as_deref()?.downcast_ref()
    }

    /// `path` is not a valid relative storage path.
    #[must_use]
    pub fn invalid_path(path: impl Into<PathBuf>) -> Self {
        Self::new(StorageErrorKind::InvalidPath).with_path(path)
    }

    /// Local I/O failure while addressing `path`.
    #[must_use]
    pub fn io(err: std::io::Error, path: Option<PathBuf>) -> Self {
        let kind = StorageErrorKind::from(err.kind());
        let status = if kind == StorageErrorKind::Timeout {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };
        let error = Self::new(kind).with_status(status).with_source(err);
        match path {
            Some(path) => error.with_path(path),
            None => error,
        }
    }

    /// Whether retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.status != ErrorStatus::Permanent
    }
}

/// `Fs storage: timed out at 3/meta.yaml: <source>`
impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.backend {
            Some(backend) => write!(f, "{backend} storage: {}", self.kind.describe())?,
            None => write!(f, "storage: {}", self.kind.describe())?,
        }
        if let Some(path) = &self.path {
            write!(f, " at {}", path.display())?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

/// Storage abstraction shared by every keg backend.
///
/// Higher layers (keg loading, index plugins, search) only ever talk to this
/// trait, so the same logic runs unmodified against the filesystem, a
/// browser-style key/value store, process memory or a remote API.
///
/// # Paths
///
/// All path parameters are relative, slash-separated paths. Implementations
/// reject paths containing `..` with [`StorageErrorKind::InvalidPath`].
pub trait Storage: Send + Sync {
    /// Read the content stored at `path`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure (disk, network, quota).
    fn read(&self, path: &str) -> Result<Option<String>, StorageError>;

    /// Write `content` to `path`, creating parent segments as needed.
    ///
    /// Readers observe either the previous content or the new content,
    /// never a partially written value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn write(&self, path: &str, content: &str) -> Result<(), StorageError>;

    /// Get status information for `path`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn stat(&self, path: &str) -> Result<Option<Stat>, StorageError>;

    /// List the names of the top-level entries under this storage root.
    ///
    /// Order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Enumerate top-level entries that are valid node ids.
    ///
    /// The returned sequence is ascending, deduplicated and finite. Every call
    /// produces a fresh sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the underlying listing fails.
    fn list_nodes(&self) -> Result<NodeIds, StorageError> {
        Ok(NodeIds::from_names(self.list()?))
    }

    /// Return a storage handle scoped under `path`.
    ///
    /// The child is a view: it shares the underlying data with its parent,
    /// but all of its operations are relative to the new root.
    fn child(&self, path: &str) -> Arc<dyn Storage>;

    /// Backend identifier used in logs and error messages.
    fn backend(&self) -> &'static str;

    /// Start watching for changes below this storage root.
    ///
    /// Returns a receiver for events and a handle to stop watching.
    /// Event paths are relative to this storage root. The default
    /// implementation returns a no-op receiver for backends that don't
    /// support change notification.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if watching cannot be started.
    fn watch(&self) -> Result<(StorageEventReceiver, WatchHandle), StorageError> {
        Ok((StorageEventReceiver::no_op(), WatchHandle::no_op()))
    }

    /// Check whether anything is stored at `path`.
    ///
    /// Returns `false` on errors (treats errors as "doesn't exist").
    fn exists(&self, path: &str) -> bool {
        matches!(self.stat(path), Ok(Some(_)))
    }
}

/// Convenience for callers holding a node id.
pub fn node_path(id: NodeId, file: &str) -> String {
    format!("{id}/{file}")
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io;
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::*;

    static_assertions::assert_impl_all!(StorageError: Send, Sync);

    #[test]
    fn test_new_error_is_permanent() {
        let err = StorageError::new(StorageErrorKind::Unavailable);

        assert_eq!(err.status, ErrorStatus::Permanent);
        assert!(!err.is_retryable());
        assert_eq!(err.path, None);
        assert_eq!(err.backend, None);
        assert!(err.source().is_none());
    }

    #[test]
    fn test_builder_sets_context() {
        let err = StorageError::new(StorageErrorKind::RateLimited)
            .with_status(ErrorStatus::Persistent)
            .with_backend("Api")
            .with_path("12/README.md");

        assert!(err.is_retryable());
        assert_eq!(err.backend, Some("Api"));
        assert_eq!(err.path.as_deref(), Some(Path::new("12/README.md")));
    }

    #[test]
    fn test_io_kind_mapping() {
        let cases = [
            (io::ErrorKind::NotFound, StorageErrorKind::NotFound),
            (io::ErrorKind::PermissionDenied, StorageErrorKind::PermissionDenied),
            (io::ErrorKind::ReadOnlyFilesystem, StorageErrorKind::PermissionDenied),
            (io::ErrorKind::AlreadyExists, StorageErrorKind::AlreadyExists),
            (io::ErrorKind::StorageFull, StorageErrorKind::Other),
        ];

        for (io_kind, expected) in cases {
            let err = StorageError::io(io::Error::from(io_kind), None);
            assert_eq!(err.kind, expected, "{io_kind:?}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_io_timeout_is_retryable() {
        let err = StorageError::io(
            io::Error::new(io::ErrorKind::TimedOut, "slow disk"),
            Some(PathBuf::from("keg")),
        );

        assert_eq!(err.kind, StorageErrorKind::Timeout);
        assert_eq!(err.status, ErrorStatus::Temporary);
        assert_eq!(err.path.as_deref(), Some(Path::new("keg")));
        assert_eq!(err.downcast_source::<io::Error>().map(io::Error::kind), Some(io::ErrorKind::TimedOut));
    }

    #[test]
    fn test_display() {
        let bare = StorageError::new(StorageErrorKind::Unavailable);
        let full = StorageError::io(
            io::Error::new(io::ErrorKind::PermissionDenied, "read-only mount"),
            Some(PathBuf::from("3/meta.yaml")),
        )
        .with_backend("Fs");

        assert_eq!(bare.to_string(), "storage: unavailable");
        assert_eq!(
            full.to_string(),
            "Fs storage: permission denied at 3/meta.yaml: read-only mount"
        );
    }

    #[test]
    fn test_invalid_path() {
        let err = StorageError::invalid_path("../outside").with_backend("Memory");

        assert_eq!(err.kind, StorageErrorKind::InvalidPath);
        assert_eq!(err.to_string(), "Memory storage: invalid path at ../outside");
    }

    #[test]
    fn test_node_path() {
        assert_eq!(node_path(NodeId::new(7), "README.md"), "7/README.md");
    }
}
