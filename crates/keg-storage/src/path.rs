//! Relative path helpers shared by backends.

use crate::storage::StorageError;

/// Normalize a relative storage path.
///
/// Drops empty and `.` segments and converts backslashes to slashes.
/// Rejects `..` segments to prevent escaping the storage root.
///
/// # Errors
///
/// Returns an `InvalidPath` error if the path contains a `..` segment.
pub fn normalize(path: &str) -> Result<String, StorageError> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(StorageError::invalid_path(path)),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Join two normalized paths, treating empty strings as the root.
pub fn join(base: &str, path: &str) -> String {
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{path}"),
    }
}

/// Return the first segment of `path` below `prefix`, if `path` lies under it.
///
/// Used by flat key/value backends to derive top-level entry names.
pub fn first_segment_under<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rest = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix)?.strip_prefix('/')?
    };
    rest.split('/').next().filter(|s| !s.is_empty())
}
