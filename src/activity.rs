//! activity.rs: bounded in-memory log of poll activity for observers.
//!
//! Injected into the engine (no global instance). Each entry is mirrored
//! to `tracing` at the matching level.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{QueryId, SourceId};

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub ts: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub source_id: Option<SourceId>,
    pub query_id: Option<QueryId>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityFilter {
    pub level: Option<Level>,
    pub source_id: Option<SourceId>,
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub struct ActivityLog {
    inner: Mutex<VecDeque<ActivityEntry>>,
    cap: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn record(
        &self,
        level: Level,
        message: impl Into<String>,
        source_id: Option<SourceId>,
        query_id: Option<QueryId>,
    ) {
        let message = message.into();
        match level {
            Level::Debug => tracing::debug!(target: "activity", source = ?source_id, "{message}"),
            Level::Info => tracing::info!(target: "activity", source = ?source_id, "{message}"),
            Level::Warning => tracing::warn!(target: "activity", source = ?source_id, "{message}"),
            Level::Error => tracing::error!(target: "activity", source = ?source_id, "{message}"),
        }

        let entry = ActivityEntry {
            ts: Utc::now(),
            level,
            message,
            source_id,
            query_id,
        };
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push_back(entry);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    pub fn info(&self, message: impl Into<String>, source_id: Option<SourceId>) {
        self.record(Level::Info, message, source_id, None);
    }

    pub fn error(&self, message: impl Into<String>, source_id: Option<SourceId>, query_id: Option<QueryId>) {
        self.record(Level::Error, message, source_id, query_id);
    }

    /// Matching entries, most recent first. `limit` keeps the newest n.
    pub fn entries(&self, filter: ActivityFilter) -> Vec<ActivityEntry> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.iter()
            .rev()
            .filter(|e| filter.level.map_or(true, |l| e.level == l))
            .filter(|e| filter.source_id.map_or(true, |s| e.source_id == Some(s)))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}
