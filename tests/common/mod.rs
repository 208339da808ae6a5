// tests/common/mod.rs
//
// Shared fakes for integration tests: a scripted query executor, a
// recording notifier, and builders for sources/records.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use issue_watch::activity::ActivityLog;
use issue_watch::model::{Query, QueryId, Record, Source, SourceId};
use issue_watch::poll::types::{QueryError, QueryExecutor};
use issue_watch::{ChangeEvent, CycleExecutor, Notifier, PollEngine, StateStore};

#[derive(Clone)]
enum Scripted {
    Records(Vec<Record>),
    Fail(String),
}

/// Answers by query expression; unknown expressions return an empty result.
#[derive(Default)]
pub struct FakeExecutor {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<(SourceId, String)>>,
    delay: Mutex<Duration>,
    delay_for: Mutex<HashMap<String, Duration>>,
}

impl FakeExecutor {
    pub fn set(&self, expression: &str, records: Vec<Record>) {
        self.responses
            .lock()
            .unwrap()
            .insert(expression.to_string(), Scripted::Records(records));
    }

    pub fn fail(&self, expression: &str, msg: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(expression.to_string(), Scripted::Fail(msg.to_string()));
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = d;
    }

    /// Delay only the given expression, e.g. to make one source hang.
    pub fn set_delay_for(&self, expression: &str, d: Duration) {
        self.delay_for.lock().unwrap().insert(expression.to_string(), d);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, source: SourceId) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| *s == source).count()
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn search(&self, source: &Source, expression: &str) -> Result<Vec<Record>, QueryError> {
        self.calls
            .lock()
            .unwrap()
            .push((source.id, expression.to_string()));
        let delay = self
            .delay_for
            .lock()
            .unwrap()
            .get(expression)
            .copied()
            .unwrap_or(*self.delay.lock().unwrap());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.responses.lock().unwrap().get(expression).cloned();
        match scripted {
            None => Ok(Vec::new()),
            Some(Scripted::Records(r)) => Ok(r),
            Some(Scripted::Fail(msg)) => Err(QueryError::Http {
                status: 500,
                body: msg,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.record.key).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, ev: &ChangeEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(ev.clone());
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("sink unavailable");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Whole seconds on a fixed day in the past; the store keeps millisecond precision.
pub fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 10, minute, 0).unwrap()
}

pub fn record(id: &str, status: &str, modified: DateTime<Utc>) -> Record {
    Record {
        id: id.to_string(),
        key: format!("OPS-{id}"),
        summary: format!("Issue {id}"),
        status: status.to_string(),
        last_modified: modified,
        fields: Default::default(),
    }
}

pub fn query(name: &str, expression: &str) -> Query {
    Query {
        id: QueryId::new(),
        name: name.to_string(),
        expression: expression.to_string(),
        enabled: true,
    }
}

pub fn source(name: &str, poll_interval: u32, queries: Vec<Query>) -> Source {
    Source {
        id: SourceId::new(),
        name: name.to_string(),
        url: "https://jira.example.com".to_string(),
        username: String::new(),
        poll_interval,
        enabled: true,
        token_env: None,
        queries,
    }
}

pub struct Harness {
    pub store: Arc<StateStore>,
    pub exec: Arc<FakeExecutor>,
    pub notifier: Arc<RecordingNotifier>,
    pub activity: Arc<ActivityLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(StateStore::in_memory().expect("in-memory store"))
    }

    pub fn with_store(store: StateStore) -> Self {
        Self {
            store: Arc::new(store),
            exec: Arc::new(FakeExecutor::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            activity: Arc::new(ActivityLog::default()),
        }
    }

    pub fn cycles(&self) -> CycleExecutor {
        CycleExecutor::new(
            self.store.clone(),
            self.exec.clone(),
            self.notifier.clone(),
            self.activity.clone(),
        )
    }

    pub fn engine(&self, sources: Vec<Source>, cadence_unit: Duration) -> PollEngine {
        PollEngine::new(self.cycles(), sources, cadence_unit)
    }
}
