// src/poll/mod.rs
pub mod providers;
pub mod scheduler;
pub mod status;
pub mod types;

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;

use crate::activity::{ActivityLog, Level};
use crate::change_detector::{decide, Verdict};
use crate::model::{Query, Record, RecordState, Source, StateKey};
use crate::notify::{ChangeEvent, Notifier};
use crate::poll::status::{CycleResult, QueryOutcome};
use crate::poll::types::QueryExecutor;
use crate::store::{StateStore, StoreError};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Poll cycles completed, per source.");
        describe_counter!("poll_errors_total", "Query or persistence failures during cycles.");
        describe_counter!("poll_changes_total", "Records that produced a notification.");
        describe_counter!("poll_records_total", "Records fetched from trackers.");
        describe_counter!("notify_failures_total", "Notification sink failures.");
        describe_histogram!("poll_cycle_ms", "Cycle wall time in milliseconds.");
        describe_gauge!("poll_last_run_ts", "Unix ts when a cycle last finished.");
    });
}

#[derive(Debug, thiserror::Error)]
enum RecordError {
    /// Nothing was notified; the record is retried next cycle.
    #[error("persisting state: {0}")]
    Persist(#[source] StoreError),
    /// Notified but not stamped; the next cycle notifies once more.
    #[error("marking notified: {1}")]
    MarkNotified(Verdict, #[source] StoreError),
}

/// Runs one cycle for one source: fetch, detect, persist, notify.
pub struct CycleExecutor {
    store: Arc<StateStore>,
    executor: Arc<dyn QueryExecutor>,
    notifier: Arc<dyn Notifier>,
    activity: Arc<ActivityLog>,
}

impl CycleExecutor {
    pub fn new(
        store: Arc<StateStore>,
        executor: Arc<dyn QueryExecutor>,
        notifier: Arc<dyn Notifier>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            executor,
            notifier,
            activity,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    /// Failures are contained per query; the last one becomes the cycle's error.
    pub async fn run_cycle(&self, source: &Source) -> CycleResult {
        let t0 = std::time::Instant::now();
        let mut result = CycleResult::default();

        for query in source.enabled_queries() {
            let outcome = self.poll_query(source, query, &mut result).await;
            result.queries.push(outcome);
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("poll_cycle_ms").record(ms);
        counter!("poll_cycles_total", "source" => source.name.clone()).increment(1);
        counter!("poll_changes_total").increment(result.change_count);
        gauge!("poll_last_run_ts").set(Utc::now().timestamp() as f64);

        self.activity.record(
            if result.error.is_some() { Level::Warning } else { Level::Info },
            format!(
                "Polled {}: {} queries, {} changes{}",
                source.name,
                result.queries.len(),
                result.change_count,
                if result.error.is_some() { ", with errors" } else { "" }
            ),
            Some(source.id),
            None,
        );
        result
    }

    async fn poll_query(&self, source: &Source, query: &Query, result: &mut CycleResult) -> QueryOutcome {
        let mut outcome = QueryOutcome {
            query_id: query.id,
            query_name: query.name.clone(),
            fetched: 0,
            new: 0,
            changed: 0,
            error: None,
        };

        let records = match self.executor.search(source, &query.expression).await {
            Ok(records) => records,
            Err(e) => {
                let msg = format!("Error polling {}: query '{}': {e}", source.name, query.name);
                counter!("poll_errors_total").increment(1);
                self.activity.error(msg.clone(), Some(source.id), Some(query.id));
                outcome.error = Some(e.to_string());
                result.error = Some(msg);
                return outcome;
            }
        };
        outcome.fetched = records.len();
        counter!("poll_records_total").increment(records.len() as u64);

        for record in &records {
            let verdict = match self.process_record(source, query, record).await {
                Ok(v) => Some(v),
                Err(e) => {
                    self.record_failure(source, query, record, &e.to_string(), result);
                    match e {
                        // Already delivered, so it still counts as a change.
                        RecordError::MarkNotified(v, _) => Some(v),
                        RecordError::Persist(_) => None,
                    }
                }
            };
            match verdict {
                Some(Verdict::New) => outcome.new += 1,
                Some(Verdict::Changed) => outcome.changed += 1,
                _ => continue,
            }
            result.change_count += 1;
        }

        tracing::debug!(
            target: "poll",
            source = %source.name,
            query = %query.name,
            fetched = outcome.fetched,
            new = outcome.new,
            changed = outcome.changed,
            "query polled"
        );
        outcome
    }

    fn record_failure(&self, source: &Source, query: &Query, record: &Record, cause: &str, result: &mut CycleResult) {
        let msg = format!("Error polling {}: {} ({}): {cause}", source.name, record.key, query.name);
        counter!("poll_errors_total").increment(1);
        self.activity.error(msg.clone(), Some(source.id), Some(query.id));
        result.error = Some(msg);
    }

    /// Persist first, then notify, then stamp the notification time.
    async fn process_record(&self, source: &Source, query: &Query, record: &Record) -> Result<Verdict, RecordError> {
        let key = StateKey::new(record.id.clone(), source.id, query.id);
        let previous = self.store.get(&key).map_err(RecordError::Persist)?;
        let verdict = decide(record, previous.as_ref());

        let merged = RecordState::merged(record, source.id, query.id, previous.as_ref());
        self.store.upsert(&merged).map_err(RecordError::Persist)?;

        if !verdict.notifies() {
            tracing::trace!(target: "poll", key = %record.key, "unchanged");
            return Ok(verdict);
        }

        let ev = ChangeEvent::new(source, query.id, &query.name, record, verdict);
        if let Err(e) = self.notifier.send(&ev).await {
            tracing::warn!(target: "poll", key = %record.key, sink = self.notifier.name(), "notify failed: {e:#}");
            self.activity.record(
                Level::Warning,
                format!("Notification for {} failed: {e:#}", record.key),
                Some(source.id),
                Some(query.id),
            );
        }
        self.store
            .mark_notified(&key, Utc::now())
            .map_err(|e| RecordError::MarkNotified(verdict, e))?;

        tracing::debug!(target: "poll", key = %record.key, verdict = ?verdict, "notified");
        Ok(verdict)
    }
}
