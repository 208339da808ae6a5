// src/poll/status.rs
//! Live per-source poll status.
//!
//! A passive sink: the scheduler and cycle executor push transitions in,
//! observers read snapshots or subscribe. All locks are held only for the
//! duration of a map update, never across a cycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::model::{QueryId, Source, SourceId};

pub type StatusMap = BTreeMap<SourceId, PollStatus>;

/// Longest period a timer is armed for; larger cadences are clamped.
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// `unit * poll_interval`, clamped to `1ms..=MAX_PERIOD`.
pub fn cadence_period(unit: Duration, poll_interval: u32) -> Duration {
    unit.checked_mul(poll_interval.max(1))
        .map_or(MAX_PERIOD, |p| p.min(MAX_PERIOD))
        .max(Duration::from_millis(1))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollStatus {
    pub source_id: SourceId,
    pub source_name: String,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub next_poll_time: Option<DateTime<Utc>>,
    pub is_polling: bool,
    /// Undismissed changes since the last reset.
    pub change_count: u64,
    pub has_changes: bool,
    pub last_error: Option<String>,
    pub queries: Vec<QueryOutcome>,
}

impl PollStatus {
    fn idle(source: &Source) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            last_poll_time: None,
            next_poll_time: None,
            is_polling: false,
            change_count: 0,
            has_changes: false,
            last_error: None,
            queries: Vec::new(),
        }
    }
}

/// Per-query statistics of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub query_id: QueryId,
    pub query_name: String,
    pub fetched: usize,
    pub new: usize,
    pub changed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleResult {
    pub change_count: u64,
    /// Last error of the cycle, if any query or write failed.
    pub error: Option<String>,
    pub queries: Vec<QueryOutcome>,
}

pub struct StatusAggregator {
    statuses: watch::Sender<StatusMap>,
    running: AtomicBool,
    cadence_unit: Duration,
}

impl StatusAggregator {
    pub fn new(cadence_unit: Duration) -> Self {
        let (statuses, _) = watch::channel(StatusMap::new());
        Self {
            statuses,
            running: AtomicBool::new(false),
            cadence_unit,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn next_poll_after(&self, source: &Source, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_running() {
            return None;
        }
        let cadence = cadence_period(self.cadence_unit, source.poll_interval);
        let d = chrono::Duration::from_std(cadence).ok()?;
        from.checked_add_signed(d)
    }

    /// Scheduler transitioned to running with the given sources.
    ///
    /// Entries of sources no longer scheduled are dropped; surviving entries
    /// keep their counters.
    pub fn on_start(&self, sources: &[Source]) {
        self.running.store(true, Ordering::SeqCst);
        let now = Utc::now();
        self.statuses.send_modify(|map| {
            map.retain(|id, _| sources.iter().any(|s| s.id == *id));
            for source in sources {
                let next = self.next_poll_after(source, now);
                let entry = map
                    .entry(source.id)
                    .or_insert_with(|| PollStatus::idle(source));
                entry.source_name = source.name.clone();
                entry.next_poll_time = next;
            }
        });
    }

    pub fn on_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.statuses.send_modify(|map| {
            for status in map.values_mut() {
                status.next_poll_time = None;
            }
        });
    }

    pub fn on_cycle_start(&self, source: &Source) {
        let now = Utc::now();
        self.statuses.send_modify(|map| {
            let entry = map
                .entry(source.id)
                .or_insert_with(|| PollStatus::idle(source));
            entry.is_polling = true;
            entry.last_poll_time = Some(now);
        });
    }

    /// Applied even when the scheduler stopped while the cycle was in flight.
    pub fn on_cycle_end(&self, source: &Source, result: &CycleResult) {
        let next = self.next_poll_after(source, Utc::now());
        self.statuses.send_modify(|map| {
            let entry = map
                .entry(source.id)
                .or_insert_with(|| PollStatus::idle(source));
            entry.is_polling = false;
            entry.change_count = entry.change_count.saturating_add(result.change_count);
            entry.has_changes = entry.change_count > 0;
            entry.last_error = result.error.clone();
            entry.next_poll_time = next;
            entry.queries = result.queries.clone();
        });
    }

    pub fn reset_change_count(&self, source_id: SourceId) -> bool {
        self.statuses.send_if_modified(|map| match map.get_mut(&source_id) {
            Some(status) => {
                status.change_count = 0;
                status.has_changes = false;
                true
            }
            None => false,
        })
    }

    pub fn forget(&self, source_id: SourceId) {
        self.statuses.send_if_modified(|map| map.remove(&source_id).is_some());
    }

    pub fn get(&self, source_id: SourceId) -> Option<PollStatus> {
        self.statuses.borrow().get(&source_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<PollStatus> {
        self.statuses.borrow().values().cloned().collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusMap> {
        self.statuses.subscribe()
    }
}
