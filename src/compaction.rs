//! Compaction manager (§4.13): periodically rebuilds the HNSW graph from
//! persisted embeddings to reclaim tombstoned space, running only once a
//! project has been idle (no search or index event) for a threshold
//! duration. An activity signal during the rebuild discards the result
//! rather than racing it into place, so the engine always sees either the
//! pre-compaction graph or a fully-finished post-compaction one — never a
//! half-swapped one.

use crate::metadata::MetadataStore;
use crate::vector_index::VectorIndex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct ActivityTracker {
    /// Unix-epoch seconds of the last observed search/index event, read with
    /// `Relaxed` ordering — compaction only needs "has something happened
    /// since I started", not a strict happens-before.
    last_activity_secs: AtomicU64,
    started: Instant,
}

impl ActivityTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(ActivityTracker { last_activity_secs: AtomicU64::new(0), started: Instant::now() })
    }

    pub fn mark(&self) {
        self.last_activity_secs.store(self.started.elapsed().as_secs(), Ordering::Relaxed);
    }

    fn generation(&self) -> u64 {
        self.last_activity_secs.load(Ordering::Relaxed)
    }

    fn idle_for(&self) -> Duration {
        Duration::from_secs(self.started.elapsed().as_secs().saturating_sub(self.generation()))
    }
}

pub struct CompactionManager {
    metadata: Arc<MetadataStore>,
    vector: Arc<Mutex<VectorIndex>>,
    activity: Arc<ActivityTracker>,
    idle_threshold: Duration,
    cancel: CancellationToken,
}

impl CompactionManager {
    pub fn new(metadata: Arc<MetadataStore>, vector: Arc<Mutex<VectorIndex>>, activity: Arc<ActivityTracker>, idle_threshold_secs: u64) -> Self {
        CompactionManager { metadata, vector, activity, idle_threshold: Duration::from_secs(idle_threshold_secs), cancel: CancellationToken::new() }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Background task: checks idleness on a fixed tick and runs one
    /// compaction pass when the threshold is crossed.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(5).min(self.idle_threshold.max(Duration::from_secs(1))));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {
                    if self.activity.idle_for() >= self.idle_threshold {
                        self.compact_once();
                    }
                }
            }
        }
    }

    fn compact_once(&self) {
        let generation_before = self.activity.generation();
        let records = match self.metadata.all_embeddings() {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "compaction: failed to load persisted embeddings");
                return;
            }
        };

        if self.activity.generation() != generation_before {
            tracing::debug!("compaction aborted: activity observed before rebuild");
            return;
        }

        // The O(n) HNSW build happens entirely off the vector lock, so a
        // concurrent search/index call against the live graph is never
        // stalled by it — only the final pointer swap needs the lock, and
        // that's re-checked for activity immediately before taking it.
        let rebuilt = VectorIndex::build_fresh(records.into_iter());

        if self.activity.generation() != generation_before {
            tracing::debug!("compaction aborted: activity observed during rebuild");
            return;
        }

        let mut vector = self.vector.lock().expect("vector lock poisoned");
        vector.install(rebuilt);
        if let Err(e) = vector.save() {
            tracing::warn!(error = %e, "compaction: snapshot save failed");
        }
        drop(vector);
        tracing::info!("compaction: vector graph rebuilt from persisted embeddings");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_tracker_resets_idle_time_on_mark() {
        let tracker = ActivityTracker::new();
        assert!(tracker.idle_for() >= Duration::from_secs(0));
        tracker.mark();
        assert_eq!(tracker.idle_for(), Duration::from_secs(0));
    }
}
