//! Errors raised while loading kegs and nodes.

use std::fmt;

use keg_storage::{NodeId, StorageError};

/// What was wrong with a keg document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The keg has no `keg` manifest.
    MissingManifest,
    /// The manifest is not a valid manifest document.
    MalformedManifest,
    /// A node's `meta.yaml` is present but invalid.
    MalformedMeta {
        /// Node the metadata belongs to.
        id: NodeId,
    },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingManifest => f.write_str("missing keg manifest"),
            Self::MalformedManifest => f.write_str("malformed keg manifest"),
            Self::MalformedMeta { id } => write!(f, "malformed metadata for node {id}"),
        }
    }
}

/// A keg document could not be decoded.
#[derive(Debug)]
pub struct ParseError {
    /// What failed.
    pub kind: ParseErrorKind,
    /// Decoder error, absent for [`ParseErrorKind::MissingManifest`].
    pub source: Option<serde_yaml::Error>,
}

impl ParseError {
    /// The keg has no manifest.
    #[must_use]
    pub fn missing_manifest() -> Self {
        Self {
            kind: ParseErrorKind::MissingManifest,
            source: None,
        }
    }

    /// The manifest failed to decode.
    #[must_use]
    pub fn malformed_manifest(source: serde_yaml::Error) -> Self {
        Self {
            kind: ParseErrorKind::MalformedManifest,
            source: Some(source),
        }
    }

    /// The metadata of node `id` failed to decode.
    #[must_use]
    pub fn malformed_meta(id: NodeId, source: serde_yaml::Error) -> Self {
        Self {
            kind: ParseErrorKind::MalformedMeta { id },
            source: Some(source),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref source) = self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Failure of a keg operation.
#[derive(Debug, thiserror::Error)]
pub enum KegError {
    /// A document could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A document could not be encoded for writing.
    #[error("failed to encode {what}: {source}")]
    Encode {
        /// Document being written.
        what: String,
        /// Encoder error.
        source: serde_yaml::Error,
    },
    /// The highest node id is taken, so no new id can be issued.
    #[error("no node id left after {last}")]
    IdsExhausted {
        /// Highest id in the keg.
        last: NodeId,
    },
}

#[cfg(test)]
mod tests {
    use keg_storage::StorageErrorKind;

    use super::*;

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::missing_manifest().to_string(),
            "missing keg manifest"
        );

        let source = serde_yaml::from_str::<Vec<u8>>("{").unwrap_err();
        let err = ParseError::malformed_meta(NodeId::new(4), source);
        assert!(err.to_string().starts_with("malformed metadata for node 4: "));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_keg_error_from_storage() {
        let err: KegError = StorageError::new(StorageErrorKind::Timeout).into();

        assert!(matches!(err, KegError::Storage(ref e) if e.kind == StorageErrorKind::Timeout));
    }
}
