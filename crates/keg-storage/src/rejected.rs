//! Storage view for a scope that failed path validation.

use std::sync::Arc;

use crate::storage::{Stat, Storage, StorageError};

/// Returned by [`Storage::child`] when the requested scope is invalid.
///
/// `child` cannot fail, so the error is deferred: every operation on the
/// view reports [`StorageErrorKind::InvalidPath`](crate::StorageErrorKind::InvalidPath)
/// for the rejected scope.
#[derive(Debug, Clone)]
pub struct RejectedScope {
    scope: String,
    backend: &'static str,
}

impl RejectedScope {
    /// Create a view for `scope` on behalf of `backend`.
    #[must_use]
    pub fn new(scope: impl Into<String>, backend: &'static str) -> Self {
        Self {
            scope: scope.into(),
            backend,
        }
    }

    fn error(&self) -> StorageError {
        StorageError::invalid_path(&self.scope).with_backend(self.backend)
    }
}

impl Storage for RejectedScope {
    fn read(&self, _path: &str) -> Result<Option<String>, StorageError> {
        Err(self.error())
    }

    fn write(&self, _path: &str, _content: &str) -> Result<(), StorageError> {
        Err(self.error())
    }

    fn stat(&self, _path: &str) -> Result<Option<Stat>, StorageError> {
        Err(self.error())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Err(self.error())
    }

    fn child(&self, _path: &str) -> Arc<dyn Storage> {
        Arc::new(self.clone())
    }

    fn backend(&self) -> &'static str {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageErrorKind;

    #[test]
    fn test_every_operation_fails_with_invalid_path() {
        let view = RejectedScope::new("../etc", "Fs");

        assert_eq!(view.read("keg").unwrap_err().kind, StorageErrorKind::InvalidPath);
        assert_eq!(view.write("keg", "x").unwrap_err().kind, StorageErrorKind::InvalidPath);
        assert_eq!(view.stat("keg").unwrap_err().kind, StorageErrorKind::InvalidPath);
        assert!(view.list_nodes().is_err());
        assert!(!view.exists("keg"));
        assert_eq!(view.child("1").backend(), "Fs");
    }
}
