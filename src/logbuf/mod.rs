//! Per-run log buffer, kept in process memory only.
//!
//! Offsets are absolute: a line keeps its index even after older lines are
//! dropped by the cap, so a poller can resume from the `total` it last saw.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Result of a poll: lines from the requested offset plus the running total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    pub lines: Vec<LogLine>,
    pub total: usize,
}

/// Run-keyed log storage shared by executors and pollers.
pub trait LogStore: Send + Sync {
    fn append(&self, run_id: &str, line: String);

    /// Lines at absolute index `offset` and later. Never blocks on a running executor.
    fn read(&self, run_id: &str, offset: usize) -> LogChunk;

    fn evict(&self, run_id: &str);
}

#[derive(Debug, Default)]
struct RunLog {
    lines: VecDeque<LogLine>,
    // Lines pushed out by the cap; the absolute index of `lines[0]`.
    dropped: usize,
}

impl RunLog {
    fn total(&self) -> usize {
        self.dropped + self.lines.len()
    }
}

/// In-memory [`LogStore`] capped per run.
#[derive(Debug)]
pub struct MemoryLogStore {
    cap: usize,
    runs: Mutex<HashMap<String, RunLog>>,
}

impl MemoryLogStore {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, run_id: &str, line: String) {
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let log = runs.entry(run_id.to_string()).or_default();
        log.lines.push_back(LogLine {
            timestamp: Utc::now(),
            text: line,
        });
        while log.lines.len() > self.cap {
            log.lines.pop_front();
            log.dropped += 1;
        }
    }

    fn read(&self, run_id: &str, offset: usize) -> LogChunk {
        let runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(log) = runs.get(run_id) else {
            return LogChunk::default();
        };
        let start = offset.saturating_sub(log.dropped);
        LogChunk {
            lines: log.lines.iter().skip(start).cloned().collect(),
            total: log.total(),
        }
    }

    fn evict(&self, run_id: &str) {
        let mut runs = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if runs.remove(run_id).is_some() {
            debug!(run_id, "evicted run logs");
        }
    }
}

/// Drop a run's logs after `after` has elapsed, leaving time for late pollers.
pub fn schedule_eviction(store: Arc<dyn LogStore>, run_id: String, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        store.evict(&run_id);
    });
}
