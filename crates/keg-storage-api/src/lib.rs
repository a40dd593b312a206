//! Remote HTTP API storage backend for keg knowledge bases.
//!
//! [`ApiStorage`] proxies every [`Storage`] operation to a remote endpoint,
//! keyed by the scoped path:
//!
//! | operation | request                   | success                              |
//! |-----------|---------------------------|--------------------------------------|
//! | `read`    | `GET  {base}/{path}`      | `200` + body, `404` for absence      |
//! | `write`   | `PUT  {base}/{path}`      | any `2xx`                            |
//! | `stat`    | `HEAD {base}/{path}`      | `200` + `Last-Modified`, `404`       |
//! | `list`    | `GET  {base}?list`        | `200` + JSON array of entry names    |
//!
//! Path segments are percent-encoded. Network failures are reported as
//! retryable [`StorageError`]s, distinct from absence.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use keg_storage::{
    ErrorStatus, RejectedScope, Stat, Storage, StorageError, StorageErrorKind, path,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use ureq::Agent;

/// Backend identifier for error messages.
const BACKEND: &str = "Api";

/// Default HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Unreserved characters of RFC 3986 stay as they are: A-Z a-z 0-9 - . _ ~
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode_path(normalized: &str) -> String {
    normalized
        .split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Map a transport failure to a storage error.
fn transport_error(e: ureq::Error, path: &str) -> StorageError {
    let (kind, status) = match &e {
        ureq::Error::Timeout(_) => (StorageErrorKind::Timeout, ErrorStatus::Temporary),
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            (StorageErrorKind::Timeout, ErrorStatus::Temporary)
        }
        ureq::Error::BadUri(_) | ureq::Error::Http(_) | ureq::Error::Json(_) => {
            (StorageErrorKind::Other, ErrorStatus::Permanent)
        }
        _ => (StorageErrorKind::Unavailable, ErrorStatus::Temporary),
    };
    StorageError::new(kind)
        .with_status(status)
        .with_backend(BACKEND)
        .with_path(path)
        .with_source(e)
}

/// Error body returned by the server, kept as the error source.
#[derive(Debug)]
struct HttpStatusError {
    status: u16,
    body: String,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if !self.body.is_empty() {
            write!(f, " - {}", self.body)?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpStatusError {}

/// Map a non-success HTTP status to a storage error.
fn status_error(status: u16, body: String, path: &str) -> StorageError {
    let (kind, retry) = match status {
        401 | 403 => (StorageErrorKind::PermissionDenied, ErrorStatus::Permanent),
        404 => (StorageErrorKind::NotFound, ErrorStatus::Permanent),
        408 => (StorageErrorKind::Timeout, ErrorStatus::Temporary),
        429 => (StorageErrorKind::RateLimited, ErrorStatus::Persistent),
        500..=599 => (StorageErrorKind::Unavailable, ErrorStatus::Persistent),
        _ => (StorageErrorKind::Other, ErrorStatus::Permanent),
    };
    StorageError::new(kind)
        .with_status(retry)
        .with_backend(BACKEND)
        .with_path(path)
        .with_source(HttpStatusError { status, body })
}

/// Read the body of a failed response for error context.
fn error_body(body: &mut ureq::Body) -> String {
    body.read_to_string()
        .unwrap_or_else(|_| "(unable to read error body)".to_owned())
}

/// Storage backed by a remote HTTP endpoint.
#[derive(Clone)]
pub struct ApiStorage {
    agent: Agent,
    base_url: String,
}

impl std::fmt::Debug for ApiStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiStorage")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiStorage {
    /// Create storage for `base_url` with the default timeout.
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create storage for `base_url` where every request must complete within `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Base URL every path is resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<String, StorageError> {
        let normalized = path::normalize(path).map_err(|e| e.with_backend(BACKEND))?;
        if normalized.is_empty() {
            return Ok(self.base_url.clone());
        }
        Ok(format!("{}/{}", self.base_url, encode_path(&normalized)))
    }
}

impl Storage for ApiStorage {
    fn read(&self, path: &str) -> Result<Option<String>, StorageError> {
        let url = self.url(path)?;
        tracing::debug!(%url, "GET");

        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| transport_error(e, path))?;

        let status = response.status().as_u16();
        let mut body = response.into_body();
        match status {
            200..=299 => body
                .read_to_string()
                .map(Some)
                .map_err(|e| transport_error(e, path)),
            404 => Ok(None),
            _ => Err(status_error(status, error_body(&mut body), path)),
        }
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StorageError> {
        let url = self.url(path)?;
        if url == self.base_url {
            return Err(StorageError::invalid_path(path).with_backend(BACKEND));
        }
        tracing::debug!(%url, bytes = content.len(), "PUT");

        let response = self
            .agent
            .put(&url)
            .header("Content-Type", "text/plain; charset=utf-8")
            .send(content.as_bytes())
            .map_err(|e| transport_error(e, path))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        let mut body = response.into_body();
        Err(status_error(status, error_body(&mut body), path))
    }

    fn stat(&self, path: &str) -> Result<Option<Stat>, StorageError> {
        let url = self.url(path)?;
        tracing::debug!(%url, "HEAD");

        let response = self
            .agent
            .head(&url)
            .call()
            .map_err(|e| transport_error(e, path))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            404 => return Ok(None),
            _ => return Err(status_error(status, String::new(), path)),
        }

        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|value| value.to_str().ok());
        let modified_at = match last_modified.map(DateTime::parse_from_rfc2822) {
            Some(Ok(parsed)) => parsed.with_timezone(&Utc),
            Some(Err(e)) => {
                tracing::warn!(%url, error = %e, "Unparseable Last-Modified header");
                DateTime::from(UNIX_EPOCH)
            }
            None => DateTime::from(UNIX_EPOCH),
        };
        Ok(Some(Stat { modified_at }))
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let url = format!("{}?list", self.base_url);
        tracing::debug!(%url, "GET list");

        let response = self
            .agent
            .get(&url)
            .header("Accept", "application/json")
            .call()
            .map_err(|e| transport_error(e, ""))?;

        let status = response.status().as_u16();
        let mut body = response.into_body();
        match status {
            200..=299 => body
                .read_json::<Vec<String>>()
                .map_err(|e| transport_error(e, "")),
            404 => Ok(Vec::new()),
            _ => Err(status_error(status, error_body(&mut body), "")),
        }
    }

    fn child(&self, path: &str) -> Arc<dyn Storage> {
        match self.url(path) {
            Ok(base_url) => Arc::new(Self {
                agent: self.agent.clone(),
                base_url,
            }),
            Err(_) => Arc::new(RejectedScope::new(path, BACKEND)),
        }
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
