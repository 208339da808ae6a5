// src/poll/scheduler.rs
//! Per-source recurring polls and the engine's control surface.
//!
//! Every enabled source gets its own timer task; a tick spawns the cycle as a
//! separate task, so stopping the engine cancels future ticks but never an
//! in-flight cycle. Cycles of the same source are serialized by a per-source
//! lock; a tick that finds its source busy is skipped. Any registry edit goes
//! through a full `restart()`, there is no incremental timer update.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::activity::ActivityLog;
use crate::config::validate_sources;
use crate::model::{IssueItem, QueryId, Source, SourceId, StateKey};
use crate::poll::status::{cadence_period, CycleResult, PollStatus, StatusAggregator, StatusMap};
use crate::poll::CycleExecutor;
use crate::store::StateStore;

pub struct PollEngine {
    inner: Arc<Inner>,
}

struct Inner {
    cycles: CycleExecutor,
    status: StatusAggregator,
    registry: RwLock<Vec<Source>>,
    /// `None` while stopped.
    timers: Mutex<Option<HashMap<SourceId, JoinHandle<()>>>>,
    cycle_locks: Mutex<HashMap<SourceId, Arc<AsyncMutex<()>>>>,
    cadence_unit: Duration,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Inner {
    fn enabled_sources(&self) -> Vec<Source> {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    fn current_source(&self, id: SourceId) -> Option<Source> {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|s| s.id == id && s.enabled)
            .cloned()
    }

    fn cycle_lock(&self, id: SourceId) -> Arc<AsyncMutex<()>> {
        lock(&self.cycle_locks).entry(id).or_default().clone()
    }

    /// Runs one cycle for `id` under its source lock. With `wait == false`
    /// a busy source is skipped. The source is resolved from the registry
    /// once the lock is held, so a removed source is never polled.
    async fn run_guarded(&self, id: SourceId, wait: bool) -> Option<CycleResult> {
        let cycle_lock = self.cycle_lock(id);
        let _guard = if wait {
            cycle_lock.lock().await
        } else {
            match cycle_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(target: "poll", source = %id, "cycle in flight, skipping tick");
                    return None;
                }
            }
        };

        let Some(source) = self.current_source(id) else {
            tracing::debug!(target: "poll", source = %id, "source gone or disabled, skipping");
            return None;
        };

        self.status.on_cycle_start(&source);
        let result = self.cycles.run_cycle(&source).await;
        self.status.on_cycle_end(&source, &result);

        match &result.error {
            Some(err) => tracing::warn!(target: "poll", source = %source.name, changes = result.change_count, "{err}"),
            None => tracing::info!(target: "poll", source = %source.name, changes = result.change_count, "cycle done"),
        }
        Some(result)
    }

    fn spawn_timer(self: &Arc<Self>, id: SourceId, period: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.run_guarded(id, false).await;
                });
            }
        })
    }

    /// Waits out any in-flight cycle of `source_id`, then deletes its rows
    /// (all of them, or only those of `queries`).
    async fn purge(&self, source_id: SourceId, queries: Option<&[QueryId]>) -> Result<usize> {
        let cycle_lock = self.cycle_lock(source_id);
        let _guard = cycle_lock.lock().await;
        let store = self.cycles.store();
        let deleted = match queries {
            None => {
                let n = store.delete_for_source(source_id)?;
                self.status.forget(source_id);
                n
            }
            Some(ids) => {
                let mut n = 0;
                for q in ids {
                    n += store.delete_for_query(*q)?;
                }
                n
            }
        };
        Ok(deleted)
    }
}

impl PollEngine {
    pub fn new(cycles: CycleExecutor, sources: Vec<Source>, cadence_unit: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cycles,
                status: StatusAggregator::new(cadence_unit),
                registry: RwLock::new(sources),
                timers: Mutex::new(None),
                cycle_locks: Mutex::new(HashMap::new()),
                cadence_unit,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timers).is_some()
    }

    /// No-op when already running. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut timers = lock(&self.inner.timers);
        if timers.is_some() {
            return;
        }

        let sources = self.inner.enabled_sources();
        self.inner.status.on_start(&sources);

        let mut handles = HashMap::with_capacity(sources.len());
        for source in &sources {
            let period = cadence_period(self.inner.cadence_unit, source.poll_interval);
            handles.insert(source.id, self.inner.spawn_timer(source.id, period));

            let inner = Arc::clone(&self.inner);
            let id = source.id;
            tokio::spawn(async move {
                inner.run_guarded(id, true).await;
            });
        }
        *timers = Some(handles);

        tracing::info!(target: "poll", sources = sources.len(), "poll engine started");
        self.inner
            .cycles
            .activity()
            .info(format!("Polling started for {} sources", sources.len()), None);
    }

    /// Cancels every timer. In-flight cycles finish and are still recorded.
    pub fn stop(&self) {
        let Some(handles) = lock(&self.inner.timers).take() else {
            return;
        };
        for handle in handles.values() {
            handle.abort();
        }
        self.inner.status.on_stop();
        tracing::info!(target: "poll", "poll engine stopped");
    }

    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    fn restart_if_running(&self) {
        if self.is_running() {
            self.restart();
        }
    }

    /// One cycle for every enabled source right now; timers are left alone.
    pub async fn poll_now(&self) -> Vec<(SourceId, CycleResult)> {
        let handles: Vec<_> = self
            .inner
            .enabled_sources()
            .into_iter()
            .map(|s| {
                let inner = Arc::clone(&self.inner);
                (s.id, tokio::spawn(async move { inner.run_guarded(s.id, true).await }))
            })
            .collect();

        let mut out = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(Some(result)) => out.push((id, result)),
                Ok(None) => {}
                Err(e) => tracing::warn!(target: "poll", source = %id, error = %e, "manual cycle aborted"),
            }
        }
        out
    }

    pub async fn poll_source_now(&self, id: SourceId) -> Option<CycleResult> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_guarded(id, true).await })
            .await
            .ok()
            .flatten()
    }

    pub fn reset_change_counter(&self, source_id: SourceId) -> bool {
        self.inner.status.reset_change_count(source_id)
    }

    pub fn status(&self, source_id: SourceId) -> Option<PollStatus> {
        self.inner.status.get(source_id)
    }

    pub fn statuses(&self) -> Vec<PollStatus> {
        self.inner.status.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusMap> {
        self.inner.status.subscribe()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        self.inner.cycles.store()
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        self.inner.cycles.activity()
    }

    /// Swap the whole registry. Rows of vanished sources and queries are deleted.
    pub async fn replace_sources(&self, sources: Vec<Source>) -> Result<()> {
        validate_sources(&sources)?;
        let old = std::mem::replace(
            &mut *self.inner.registry.write().unwrap_or_else(|p| p.into_inner()),
            sources.clone(),
        );
        self.restart_if_running();

        for prev in &old {
            match sources.iter().find(|s| s.id == prev.id) {
                None => {
                    self.inner.purge(prev.id, None).await?;
                }
                Some(next) => {
                    let gone = vanished_queries(prev, next);
                    if !gone.is_empty() {
                        self.inner.purge(prev.id, Some(gone.as_slice())).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Add or replace one source by id.
    pub async fn upsert_source(&self, source: Source) -> Result<()> {
        let mut next = self.sources();
        match next.iter_mut().find(|s| s.id == source.id) {
            Some(slot) => *slot = source,
            None => next.push(source),
        }
        self.replace_sources(next).await
    }

    pub async fn remove_source(&self, id: SourceId) -> Result<bool> {
        let removed = {
            let mut reg = self.inner.registry.write().unwrap_or_else(|p| p.into_inner());
            let before = reg.len();
            reg.retain(|s| s.id != id);
            reg.len() != before
        };
        if !removed {
            return Ok(false);
        }
        self.restart_if_running();
        let deleted = self.inner.purge(id, None).await?;
        lock(&self.inner.cycle_locks).remove(&id);
        self.activity()
            .info(format!("Source removed, {deleted} stored records deleted"), Some(id));
        Ok(true)
    }

    pub async fn remove_query(&self, source_id: SourceId, query_id: QueryId) -> Result<bool> {
        let removed = {
            let mut reg = self.inner.registry.write().unwrap_or_else(|p| p.into_inner());
            match reg.iter_mut().find(|s| s.id == source_id) {
                Some(source) => {
                    let before = source.queries.len();
                    source.queries.retain(|q| q.id != query_id);
                    source.queries.len() != before
                }
                None => false,
            }
        };
        if !removed {
            return Ok(false);
        }
        self.restart_if_running();
        self.inner.purge(source_id, Some(std::slice::from_ref(&query_id))).await?;
        Ok(true)
    }

    /// Stored rows joined with the current registry, most recently modified first.
    pub fn list_issues(&self) -> Result<Vec<IssueItem>> {
        let sources = self.sources();
        let states = self.store().all_states()?;
        Ok(states
            .into_iter()
            .filter_map(|st| {
                let source = sources.iter().find(|s| s.id == st.source_id)?;
                let query = source.query(st.query_id)?;
                Some(IssueItem {
                    url: source.browse_url(&st.key),
                    id: st.record_id,
                    key: st.key,
                    summary: st.summary,
                    status: st.status,
                    last_modified: st.last_modified,
                    source_id: source.id,
                    source_name: source.name.clone(),
                    query_id: query.id,
                    query_name: query.name.clone(),
                    is_read: st.is_read,
                    is_new: !st.is_read,
                })
            })
            .collect())
    }

    pub fn mark_one_read(&self, key: &StateKey) -> Result<bool> {
        Ok(self.store().mark_read(key)?)
    }

    /// Marks every row of the given record ids, across sources and queries.
    pub fn mark_read(&self, record_ids: &[String]) -> Result<usize> {
        Ok(self.store().mark_many_read(record_ids)?)
    }

    pub fn mark_all_read(&self) -> Result<usize> {
        Ok(self.store().mark_all_read()?)
    }

    pub fn mark_unread(&self, key: &StateKey) -> Result<bool> {
        Ok(self.store().mark_unread(key)?)
    }
}

impl Drop for PollEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn vanished_queries(prev: &Source, next: &Source) -> Vec<QueryId> {
    let keep: HashSet<QueryId> = next.queries.iter().map(|q| q.id).collect();
    prev.queries
        .iter()
        .map(|q| q.id)
        .filter(|id| !keep.contains(id))
        .collect()
}
