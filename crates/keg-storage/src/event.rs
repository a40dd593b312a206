//! Change notifications delivered by [`Storage::watch`](crate::Storage::watch).
//!
//! A watching backend pushes [`StorageEvent`]s into a channel; callers drain
//! it through [`StorageEventReceiver`] and end the subscription by dropping
//! (or stopping) the paired [`WatchHandle`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::node_id::NodeId;

/// What happened to a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageEventKind {
    Created,
    Modified,
    Removed,
}

/// One change under a watched keg root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    /// Keg-relative path such as `12/README.md`.
    pub path: String,
    pub kind: StorageEventKind,
}

impl StorageEvent {
    /// Node the event belongs to, if its path lies inside a node directory.
    ///
    /// Only the leading segment counts, so `dex/12` is not a node change.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        let first = self.path.split('/').next()?;
        first.parse().ok()
    }
}

/// Outcome of [`StorageEventReceiver::poll`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    Event(StorageEvent),
    /// The wait elapsed without a change.
    Timeout,
    /// The producing side hung up.
    Closed,
}

/// Consumer end of a watch subscription.
pub struct StorageEventReceiver {
    inner: Receiver<StorageEvent>,
}

impl StorageEventReceiver {
    pub fn new(inner: Receiver<StorageEvent>) -> Self {
        Self { inner }
    }

    /// Block until a change arrives, or `None` once the producer is gone.
    #[must_use]
    pub fn recv(&self) -> Option<StorageEvent> {
        self.inner.recv().ok()
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StorageEvent> {
        self.inner.recv_timeout(timeout).ok()
    }

    /// Wait up to `timeout`, distinguishing an idle wait from a closed channel.
    #[must_use]
    pub fn poll(&self, timeout: Duration) -> Received {
        match self.inner.recv_timeout(timeout) {
            Ok(event) => Received::Event(event),
            Err(RecvTimeoutError::Timeout) => Received::Timeout,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    /// Take a pending change without waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<StorageEvent> {
        self.inner.try_recv().ok()
    }

    /// Blocking iterator that ends when the producer hangs up.
    pub fn iter(&self) -> impl Iterator<Item = StorageEvent> + '_ {
        self.inner.iter()
    }

    /// A receiver whose producer is already gone.
    ///
    /// Returned by backends that cannot observe changes.
    pub fn no_op() -> Self {
        let (_, inner) = mpsc::channel();
        Self { inner }
    }
}

/// Keeps a watch alive; dropping it closes the shutdown channel the
/// watcher thread listens on.
pub struct WatchHandle {
    shutdown: Option<Sender<()>>,
}

impl WatchHandle {
    pub fn new(shutdown: Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// End the watch now.
    pub fn stop(mut self) {
        drop(self.shutdown.take());
    }

    /// A handle with nothing to shut down.
    pub fn no_op() -> Self {
        Self { shutdown: None }
    }
}
