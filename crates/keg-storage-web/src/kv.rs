//! Hierarchical [`Storage`] over a flat [`StorageArea`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keg_storage::{
    RejectedScope, Stat, Storage, StorageError, StorageErrorKind, path,
};
use serde::{Deserialize, Serialize};

use crate::area::{AreaError, StorageArea};

const BACKEND: &str = "Web";

/// Value stored under each key. Content and timestamp travel together so a
/// single `set_item` updates both.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    content: String,
    modified_at: DateTime<Utc>,
}

fn area_error(e: AreaError, path: &str) -> StorageError {
    let kind = match &e {
        AreaError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
            StorageErrorKind::PermissionDenied
        }
        _ => StorageErrorKind::Other,
    };
    StorageError::new(kind)
        .with_backend(BACKEND)
        .with_path(path)
        .with_source(e)
}

/// Storage that keeps every file as one key of a [`StorageArea`].
///
/// The key of a file is `<namespace>/<scope>/<path>`, where the scope is
/// accumulated through [`Storage::child`]. Views created from one
/// `KvStorage` share the area.
#[derive(Clone)]
pub struct KvStorage {
    area: Arc<dyn StorageArea>,
    /// Namespace and scope joined, the prefix of every key this view owns.
    prefix: String,
}

impl std::fmt::Debug for KvStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl KvStorage {
    /// Create storage over `area` with every key under `namespace`.
    pub fn new(area: Arc<dyn StorageArea>, namespace: &str) -> Self {
        let prefix = path::normalize(namespace).unwrap_or_default();
        Self { area, prefix }
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        let normalized = path::normalize(path).map_err(|e| e.with_backend(BACKEND))?;
        Ok(path::join(&self.prefix, &normalized))
    }

    fn envelope(&self, key: &str, path: &str) -> Result<Option<Envelope>, StorageError> {
        let Some(raw) = self.area.get_item(key).map_err(|e| area_error(e, path))? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| area_error(AreaError::Corrupt(e), path))
    }
}

impl Storage for KvStorage {
    fn read(&self, path: &str) -> Result<Option<String>, StorageError> {
        let key = self.key(path)?;
        Ok(self.envelope(&key, path)?.map(|envelope| envelope.content))
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let key = self.key(path)?;
        if key == self.prefix {
            return Err(StorageError::invalid_path(path).with_backend(BACKEND));
        }
        let envelope = Envelope {
            content: content.to_owned(),
            modified_at: Utc::now(),
        };
        let value = serde_json::to_string(&envelope)
            .map_err(|e| area_error(AreaError::Corrupt(e), path))?;
        self.area
            .set_item(&key, &value)
            .map_err(|e| area_error(e, path))?;
        tracing::debug!(key = %key, bytes = content.len(), "Stored item");
        Ok(())
    }

    /// A key reports its own time. A prefix that other keys live under
    /// reports the newest of them.
    fn stat(&self, path: &str) -> Result<Option<Stat>, StorageError> {
        let key = self.key(path)?;
        if let Some(envelope) = self.envelope(&key, path)? {
            return Ok(Some(Stat {
                modified_at: envelope.modified_at,
            }));
        }

        let dir_prefix = format!("{key}/");
        let mut newest: Option<DateTime<Utc>> = None;
        for nested in self.area.keys().map_err(|e| area_error(e, path))? {
            if !(key.is_empty() || nested.starts_with(&dir_prefix)) {
                continue;
            }
            if let Some(envelope) = self.envelope(&nested, path)? {
                newest = newest.max(Some(envelope.modified_at));
            }
        }
        Ok(newest.map(|modified_at| Stat { modified_at }))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.area.keys().map_err(|e| area_error(e, ""))?;
        let names: BTreeSet<&str> = keys
            .iter()
            .filter_map(|key| path::first_segment_under(&self.prefix, key))
            .collect();
        Ok(names.into_iter().map(str::to_owned).collect())
    }

    fn child(&self, path: &str) -> Arc<dyn Storage> {
        match self.key(path) {
            Ok(prefix) => Arc::new(Self {
                area: Arc::clone(&self.area),
                prefix,
            }),
            Err(_) => Arc::new(RejectedScope::new(path, BACKEND)),
        }
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
