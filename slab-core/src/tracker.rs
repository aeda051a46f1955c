//! Non-blocking model-usage tracking (SPEC_FULL.md §4.6 step 5, §9).
//!
//! `ModelManager`, `Recorder`, and `Tracker` are named together as parallel
//! capability holes; unlike the other two the teacher carries no model-usage
//! bookkeeping of its own to generalize, so this mirrors this crate's own
//! [`crate::recorder::Recorder`] shape instead (bounded, single-mutex,
//! in-memory) rather than a teacher file.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

/// Capability for recording that a model reference was used by a request.
///
/// The dispatcher calls this without awaiting completion on the response
/// path (SPEC_FULL.md §4.6 step 5: "tracks the model usage
/// non-blockingly") — implementations must not let their own cost show up
/// in request latency.
#[async_trait]
pub trait Tracker: Send + Sync + 'static {
    async fn track_usage(&self, model_ref: &str);
}

/// A snapshot row of one model's in-memory usage counters.
#[derive(Debug, Clone)]
pub struct UsageStats {
    pub model_ref: String,
    pub count: u64,
    pub last_used: Instant,
}

/// Tracks per-model request counts and last-used times in memory.
///
/// No persistence: the key space is bounded in practice by the size of the
/// local model store, not by request volume.
pub struct InMemoryTracker {
    usage: Mutex<HashMap<String, (u64, Instant)>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self {
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot all tracked models, in no particular order.
    pub fn snapshot(&self) -> Vec<UsageStats> {
        self.usage
            .lock()
            .expect("tracker lock poisoned")
            .iter()
            .map(|(model_ref, (count, last_used))| UsageStats {
                model_ref: model_ref.clone(),
                count: *count,
                last_used: *last_used,
            })
            .collect()
    }
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracker for InMemoryTracker {
    async fn track_usage(&self, model_ref: &str) {
        let mut usage = self.usage.lock().expect("tracker lock poisoned");
        let entry = usage
            .entry(model_ref.to_owned())
            .or_insert((0, Instant::now()));
        entry.0 += 1;
        entry.1 = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_repeated_usage() {
        let tracker = InMemoryTracker::new();
        tracker.track_usage("m1").await;
        tracker.track_usage("m1").await;
        tracker.track_usage("m2").await;

        let snapshot = tracker.snapshot();
        let m1 = snapshot.iter().find(|s| s.model_ref == "m1").unwrap();
        let m2 = snapshot.iter().find(|s| s.model_ref == "m2").unwrap();
        assert_eq!(m1.count, 2);
        assert_eq!(m2.count, 1);
    }
}
