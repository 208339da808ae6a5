// src/model.rs
//! Core data types shared by the store, the poll engine, and the notifiers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(SourceId);
uuid_id!(QueryId);

/// A monitored tracker instance with its own endpoint, cadence and queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    /// Base URL of the tracker, e.g. `https://jira.example.com`.
    pub url: String,
    #[serde(default)]
    pub username: String,
    /// Poll cadence in cadence units (minutes unless configured otherwise). Always >= 1.
    pub poll_interval: u32,
    pub enabled: bool,
    /// Environment variable holding the API token, if not using the default name.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub queries: Vec<Query>,
}

impl Source {
    pub fn enabled_queries(&self) -> impl Iterator<Item = &Query> {
        self.queries.iter().filter(|q| q.enabled)
    }

    pub fn query(&self, id: QueryId) -> Option<&Query> {
        self.queries.iter().find(|q| q.id == id)
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.url.trim_end_matches('/'), key)
    }
}

/// A named search scoped to a source. The id survives edits to name/expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub name: String,
    /// Passed verbatim to the query executor (JQL for Jira).
    pub expression: String,
    pub enabled: bool,
}

/// One item returned by a query, received fresh on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub status: String,
    /// Modification time as reported by the tracker, not receipt time.
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Primary key of a persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub record_id: String,
    pub source_id: SourceId,
    pub query_id: QueryId,
}

impl StateKey {
    pub fn new(record_id: impl Into<String>, source_id: SourceId, query_id: QueryId) -> Self {
        Self {
            record_id: record_id.into(),
            source_id,
            query_id,
        }
    }
}

/// Last known snapshot of a record under one (source, query), plus notification bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordState {
    pub record_id: String,
    pub key: String,
    pub source_id: SourceId,
    pub query_id: QueryId,
    pub summary: String,
    pub status: String,
    pub last_modified: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub is_read: bool,
}

impl RecordState {
    /// Fresh record fields merged with the bookkeeping of the previous row, if any.
    pub fn merged(
        record: &Record,
        source_id: SourceId,
        query_id: QueryId,
        previous: Option<&RecordState>,
    ) -> Self {
        Self {
            record_id: record.id.clone(),
            key: record.key.clone(),
            source_id,
            query_id,
            summary: record.summary.clone(),
            status: record.status.clone(),
            last_modified: record.last_modified,
            last_notified_at: previous.and_then(|p| p.last_notified_at),
            is_read: previous.is_some_and(|p| p.is_read),
        }
    }

    pub fn key(&self) -> StateKey {
        StateKey::new(self.record_id.clone(), self.source_id, self.query_id)
    }
}

/// A persisted row joined with the current registry, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueItem {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub status: String,
    pub last_modified: DateTime<Utc>,
    pub source_id: SourceId,
    pub source_name: String,
    pub query_id: QueryId,
    pub query_name: String,
    pub url: String,
    pub is_read: bool,
    pub is_new: bool,
}
