//! Debouncer (§4.11): coalesces bursts of filesystem events on the same
//! path, within a bounded, self-extending window, into a single event per
//! path using the merge table from the spec.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Create,
    Modify,
    Delete,
}

/// Combine an accumulated event with a newly observed one on the same path.
/// `None` means the pair cancels out entirely (Create then Delete within the
/// same window — nothing ever reached disk as far as the index cares).
fn combine(prev: RawKind, next: RawKind) -> Option<RawKind> {
    use RawKind::*;
    match (prev, next) {
        (Create, Modify) => Some(Create),
        (Create, Delete) => None,
        (Modify, Delete) => Some(Delete),
        (Delete, Create) => Some(Modify),
        (Modify, Modify) => Some(Modify),
        (Create, Create) => Some(Create),
        (Delete, Delete) => Some(Delete),
        (Delete, Modify) => Some(Modify),
    }
}

struct PendingEntry {
    kind: RawKind,
    last_seen: Instant,
}

pub struct Debouncer {
    window: Duration,
    pending: Mutex<HashMap<PathBuf, PendingEntry>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer { window, pending: Mutex::new(HashMap::new()) }
    }

    /// Record a new raw event for `path`, combining with whatever is
    /// currently pending. Extends the window by resetting `last_seen`.
    pub fn record(&self, path: PathBuf, kind: RawKind) {
        let mut pending = self.pending.lock().expect("debouncer lock poisoned");
        match pending.remove(&path) {
            Some(existing) => {
                if let Some(merged) = combine(existing.kind, kind) {
                    pending.insert(path, PendingEntry { kind: merged, last_seen: Instant::now() });
                }
                // combine() == None: Create+Delete cancel out, leave removed.
            }
            None => {
                pending.insert(path, PendingEntry { kind, last_seen: Instant::now() });
            }
        }
    }

    /// Drain every entry whose window has elapsed, returning `(path, kind)`
    /// pairs ready to emit. Entries still within their window are left in
    /// place for the next poll.
    pub fn drain_ready(&self) -> Vec<(PathBuf, RawKind)> {
        let mut pending = self.pending.lock().expect("debouncer lock poisoned");
        let now = Instant::now();
        let ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();
        ready
            .into_iter()
            .filter_map(|path| pending.remove(&path).map(|e| (path, e.kind)))
            .collect()
    }

    /// Run a background poll loop emitting coalesced events to `tx` until
    /// the channel is dropped.
    pub async fn run(self: std::sync::Arc<Self>, tx: mpsc::Sender<(PathBuf, RawKind)>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            for (path, kind) in self.drain_ready() {
                if tx.send((path, kind)).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_modify_coalesces_to_create() {
        assert_eq!(combine(RawKind::Create, RawKind::Modify), Some(RawKind::Create));
    }

    #[test]
    fn create_then_delete_cancels_out() {
        assert_eq!(combine(RawKind::Create, RawKind::Delete), None);
    }

    #[test]
    fn modify_then_delete_is_delete() {
        assert_eq!(combine(RawKind::Modify, RawKind::Delete), Some(RawKind::Delete));
    }

    #[test]
    fn delete_then_create_is_modify() {
        assert_eq!(combine(RawKind::Delete, RawKind::Create), Some(RawKind::Modify));
    }

    #[test]
    fn modify_then_modify_is_modify() {
        assert_eq!(combine(RawKind::Modify, RawKind::Modify), Some(RawKind::Modify));
    }

    #[test]
    fn create_delete_sequence_leaves_nothing_pending() {
        let deb = Debouncer::new(Duration::from_millis(1));
        let path = PathBuf::from("a.rs");
        deb.record(path.clone(), RawKind::Create);
        deb.record(path.clone(), RawKind::Delete);
        assert!(deb.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn burst_within_window_emits_once() {
        let deb = std::sync::Arc::new(Debouncer::new(Duration::from_millis(50)));
        deb.record(PathBuf::from("f.rs"), RawKind::Modify);
        tokio::time::sleep(Duration::from_millis(10)).await;
        deb.record(PathBuf::from("f.rs"), RawKind::Modify);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(deb.drain_ready().is_empty(), "window not elapsed yet");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let ready = deb.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1, RawKind::Modify);
    }
}
