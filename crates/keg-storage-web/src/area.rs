//! Flat key/value areas.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Errors reported by a [`StorageArea`].
#[derive(Debug, thiserror::Error)]
pub enum AreaError {
    /// Storing the item would exceed the area's quota.
    #[error("quota exceeded storing {key:?}: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },
    /// The persisted area could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The persisted area is not a valid document.
    #[error("corrupt area: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A flat string-to-string store, shaped like the Web Storage API.
///
/// Keys carry no structure of their own; [`KvStorage`](crate::KvStorage)
/// builds hierarchical paths on top of them.
pub trait StorageArea: Send + Sync {
    /// Value stored under `key`, if any.
    fn get_item(&self, key: &str) -> Result<Option<String>, AreaError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Fails with [`AreaError::QuotaExceeded`] when the area is full. The
    /// previous value is left in place in that case.
    fn set_item(&self, key: &str, value: &str) -> Result<(), AreaError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), AreaError>;

    /// Every key currently stored.
    fn keys(&self) -> Result<Vec<String>, AreaError>;
}

/// Bytes charged against a quota for one item.
pub(crate) fn item_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// In-process [`StorageArea`].
///
/// An optional quota mimics the per-origin limit browsers enforce.
#[derive(Debug, Default)]
pub struct MemoryArea {
    items: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryArea {
    /// Create an empty area without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty area that holds at most `bytes` of keys and values.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            items: RwLock::default(),
            quota: Some(bytes),
        }
    }
}

/// Check that replacing `key` with `value` keeps `items` within `quota`.
pub(crate) fn check_quota(
    items: &BTreeMap<String, String>,
    quota: Option<usize>,
    key: &str,
    value: &str,
) -> Result<(), AreaError> {
    let Some(limit) = quota else {
        return Ok(());
    };
    let used: usize = items
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| item_size(k, v))
        .sum();
    let needed = used + item_size(key, value);
    if needed > limit {
        return Err(AreaError::QuotaExceeded {
            key: key.to_owned(),
            needed,
            limit,
        });
    }
    Ok(())
}

impl StorageArea for MemoryArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, AreaError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), AreaError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        check_quota(&items, self.quota, key, value)?;
        items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), AreaError> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, AreaError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.keys().cloned().collect())
    }
}
