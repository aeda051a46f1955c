//! Bounded in-memory ring of recent request/response records (SPEC_FULL.md §10.5).
//!
//! Not a database — persistence is explicitly out of scope. The HTTP layer
//! wraps the whole router in middleware that feeds this, the way the
//! existing trace middleware wraps the whole router rather than individual
//! handlers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One recorded request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub trace_id: String,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    pub backend: Option<String>,
    pub status: u16,
    pub latency_ms: u64,
}

/// Fixed-capacity ring buffer of the most recent [`RequestRecord`]s.
pub struct Recorder {
    capacity: usize,
    records: Mutex<VecDeque<RequestRecord>>,
}

impl Recorder {
    /// Build a recorder retaining at most `capacity` records; oldest are
    /// dropped first.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record one request/response, evicting the oldest entry if at capacity.
    pub fn record(
        &self,
        trace_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        model: Option<String>,
        backend: Option<String>,
        status: u16,
        latency: Duration,
    ) {
        let record = RequestRecord {
            trace_id: trace_id.into(),
            method: method.into(),
            path: path.into(),
            model,
            backend,
            status,
            latency_ms: latency.as_millis() as u64,
        };
        let mut records = self.records.lock().expect("recorder lock poisoned");
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Snapshot the current contents, most recent last.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records
            .lock()
            .expect("recorder lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let recorder = Recorder::new(2);
        recorder.record("t1", "GET", "/a", None, None, 200, Duration::from_millis(1));
        recorder.record("t2", "GET", "/b", None, None, 200, Duration::from_millis(1));
        recorder.record("t3", "GET", "/c", None, None, 200, Duration::from_millis(1));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].trace_id, "t2");
        assert_eq!(snapshot[1].trace_id, "t3");
    }

    #[test]
    fn empty_recorder_snapshots_empty() {
        let recorder = Recorder::new(8);
        assert!(recorder.snapshot().is_empty());
    }
}
