//! Coalescing of raw filesystem notifications.
//!
//! Editors and atomic renames emit several events per save. The debouncer
//! folds them into one event per relative path once the path has been quiet
//! for the configured window.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use keg_storage::{StorageEvent, StorageEventKind};

struct Pending {
    kind: StorageEventKind,
    deadline: Instant,
}

/// Thread-safe event debouncer keyed by storage-relative path.
pub(crate) struct EventDebouncer {
    pending: Mutex<BTreeMap<String, Pending>>,
    window: Duration,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            window,
        }
    }

    /// Record an event. Called from the notify callback thread.
    pub fn record(&self, path: String, kind: StorageEventKind) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + self.window;

        let merged = match pending.remove(&path) {
            None => Some(kind),
            Some(existing) => Self::coalesce(existing.kind, kind),
        };
        if let Some(kind) = merged {
            pending.insert(path, Pending { kind, deadline });
        }
    }

    /// Fold a new event into the one already pending for the same path.
    ///
    /// `None` means the path appeared and vanished within one window.
    #[allow(clippy::match_same_arms)]
    fn coalesce(existing: StorageEventKind, new: StorageEventKind) -> Option<StorageEventKind> {
        use StorageEventKind::{Created, Modified, Removed};

        match (existing, new) {
            (Created, Removed) => None,
            (Created, _) => Some(Created),
            (Modified, kind) => Some(kind),
            (Removed, Created) => Some(Modified),
            (Removed, _) => Some(Removed),
        }
    }

    /// Take every event whose window has elapsed, ordered by path.
    pub fn drain_ready(&self) -> Vec<StorageEvent> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let (ready, waiting): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut *pending)
                .into_iter()
                .partition(|(_, event)| event.deadline <= now);
        *pending = waiting;

        ready
            .into_iter()
            .map(|(path, event)| StorageEvent {
                path,
                kind: event.kind,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const WINDOW: Duration = Duration::from_millis(10);

    fn settle() {
        thread::sleep(WINDOW + Duration::from_millis(5));
    }

    #[test]
    fn test_event_held_until_window_elapses() {
        let debouncer = EventDebouncer::new(WINDOW);

        debouncer.record("1/README.md".to_owned(), StorageEventKind::Modified);
        assert!(debouncer.drain_ready().is_empty());

        settle();

        let events = debouncer.drain_ready();
        assert_eq!(
            events,
            vec![StorageEvent {
                path: "1/README.md".to_owned(),
                kind: StorageEventKind::Modified,
            }]
        );
        assert!(debouncer.drain_ready().is_empty());
    }

    #[test]
    fn test_editor_save_burst_is_one_event() {
        let debouncer = EventDebouncer::new(WINDOW);

        for _ in 0..3 {
            debouncer.record("2/meta.yaml".to_owned(), StorageEventKind::Modified);
        }
        settle();

        assert_eq!(debouncer.drain_ready().len(), 1);
    }

    #[test]
    fn test_created_then_removed_is_dropped() {
        let debouncer = EventDebouncer::new(WINDOW);

        debouncer.record("3/README.md".to_owned(), StorageEventKind::Created);
        debouncer.record("3/README.md".to_owned(), StorageEventKind::Removed);
        settle();

        assert!(debouncer.drain_ready().is_empty());
    }

    #[test]
    fn test_drain_is_ordered_by_path() {
        let debouncer = EventDebouncer::new(WINDOW);

        debouncer.record("5/README.md".to_owned(), StorageEventKind::Created);
        debouncer.record("10/README.md".to_owned(), StorageEventKind::Modified);
        settle();

        let paths: Vec<_> = debouncer
            .drain_ready()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["10/README.md", "5/README.md"]);
    }

    #[test]
    fn test_coalesce_matrix() {
        use StorageEventKind::{Created, Modified, Removed};

        assert_eq!(EventDebouncer::coalesce(Created, Created), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Created, Modified), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Created, Removed), None);

        assert_eq!(EventDebouncer::coalesce(Modified, Created), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Modified, Modified), Some(Modified));
        assert_eq!(EventDebouncer::coalesce(Modified, Removed), Some(Removed));

        assert_eq!(EventDebouncer::coalesce(Removed, Created), Some(Modified));
        assert_eq!(EventDebouncer::coalesce(Removed, Modified), Some(Removed));
        assert_eq!(EventDebouncer::coalesce(Removed, Removed), Some(Removed));
    }
}
