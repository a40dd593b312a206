//! [`StorageArea`] persisted as a single JSON document.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::area::{AreaError, StorageArea, check_quota};

/// Area stored on disk as one JSON object of `key -> value`.
///
/// The whole document is loaded on open and rewritten on every change via a
/// temporary file and rename, so a crash leaves either the old or the new
/// document on disk.
#[derive(Debug)]
pub struct FileArea {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl FileArea {
    /// Open the area stored at `path`. A missing file is an empty area.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but can't be read or isn't a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AreaError> {
        let path = path.into();
        let items = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), items = items.len(), "Opened storage area");
        Ok(Self {
            path,
            items: Mutex::new(items),
            quota: None,
        })
    }

    /// Limit the area to `bytes` of keys and values.
    #[must_use]
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), AreaError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, items)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl StorageArea for FileArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, AreaError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), AreaError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        check_quota(&items, self.quota, key, value)?;
        let previous = items.insert(key.to_owned(), value.to_owned());
        if let Err(e) = self.persist(&items) {
            // Keep memory in step with disk.
            match previous {
                Some(old) => items.insert(key.to_owned(), old),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), AreaError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = items.remove(key)
            && let Err(e) = self.persist(&items)
        {
            items.insert(key.to_owned(), old);
            return Err(e);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, AreaError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_missing_file_is_empty_area() {
        let temp_dir = tempfile::tempdir().unwrap();

        let area = FileArea::open(temp_dir.path().join("area.json")).unwrap();

        assert!(area.keys().unwrap().is_empty());
    }

    #[test]
    fn test_items_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("area.json");

        let area = FileArea::open(&path).unwrap();
        area.set_item("keg/notes/keg", "{}").unwrap();
        area.set_item("keg/notes/1/README.md", "x").unwrap();
        area.remove_item("keg/notes/keg").unwrap();
        drop(area);

        let reopened = FileArea::open(&path).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["keg/notes/1/README.md"]);
        assert_eq!(
            reopened.get_item("keg/notes/1/README.md").unwrap().as_deref(),
            Some("x")
        );
    }

    #[test]
    fn test_corrupt_document_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("area.json");
        fs::write(&path, "not json").unwrap();

        let err = FileArea::open(&path).unwrap_err();

        assert!(matches!(err, AreaError::Corrupt(_)));
    }

    #[test]
    fn test_quota_rejects_without_touching_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("area.json");
        let area = FileArea::open(&path).unwrap().with_quota(4);

        assert!(area.set_item("key", "value").is_err());
        assert!(!path.exists());
    }
}
