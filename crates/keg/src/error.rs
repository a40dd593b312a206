//! CLI error types.

use keg_config::ConfigError;
use keg_core::dex::IndexConfigError;
use keg_core::{BackendError, KegError, ResolveError, SearchError};
use keg_storage::StorageError;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Keg(#[from] KegError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Search(#[from] SearchError),

    #[error("{0}")]
    Index(#[from] IndexConfigError),

    #[error("every index plugin failed ({0})")]
    IndexFailed(usize),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode output: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),
}
