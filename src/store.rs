// src/store.rs
//! Durable record state keyed by (record id, source id, query id).
//!
//! One SQLite connection behind a mutex: every statement is serialized, so
//! overlapping cycles that touch the same key apply their writes one after
//! the other. Timestamps are stored as unix milliseconds.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{QueryId, RecordState, SourceId, StateKey};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS issue_states (
    record_id        TEXT    NOT NULL,
    record_key       TEXT    NOT NULL,
    source_id        TEXT    NOT NULL,
    query_id         TEXT    NOT NULL,
    summary          TEXT    NOT NULL,
    status           TEXT    NOT NULL,
    last_modified    INTEGER NOT NULL,
    last_notified_at INTEGER,
    is_read          INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (record_id, source_id, query_id)
);
CREATE INDEX IF NOT EXISTS idx_issue_states_source ON issue_states(source_id);
CREATE INDEX IF NOT EXISTS idx_issue_states_query ON issue_states(query_id);
";

const COLUMNS: &str = "record_id, record_key, source_id, query_id, summary, status, \
                       last_modified, last_notified_at, is_read";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("opening state store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("state store: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct StateStore {
    conn: Mutex<Connection>,
}

/// Row as stored, before identifiers and timestamps are decoded.
struct RawRow {
    record_id: String,
    record_key: String,
    source_id: String,
    query_id: String,
    summary: String,
    status: String,
    last_modified: i64,
    last_notified_at: Option<i64>,
    is_read: bool,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_id: row.get(0)?,
            record_key: row.get(1)?,
            source_id: row.get(2)?,
            query_id: row.get(3)?,
            summary: row.get(4)?,
            status: row.get(5)?,
            last_modified: row.get(6)?,
            last_notified_at: row.get(7)?,
            is_read: row.get(8)?,
        })
    }

    fn decode(self) -> Option<RecordState> {
        let source_id = self.source_id.parse::<SourceId>().ok()?;
        let query_id = self.query_id.parse::<QueryId>().ok()?;
        let last_modified = from_millis(self.last_modified)?;
        let last_notified_at = match self.last_notified_at {
            Some(ms) => Some(from_millis(ms)?),
            None => None,
        };
        Some(RecordState {
            record_id: self.record_id,
            key: self.record_key,
            source_id,
            query_id,
            summary: self.summary,
            status: self.status,
            last_modified,
            last_notified_at,
            is_read: self.is_read,
        })
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

impl StateStore {
    /// Open (or create) the store at `path`. Failure here is a startup error.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let open_err = |source| StoreError::Open {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(target: "store", error = %e, dir = %dir.display(), "state dir");
            }
        }
        let conn = Connection::open(path).map_err(open_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(open_err)?;
        conn.execute_batch(SCHEMA).map_err(open_err)?;
        tracing::info!(target: "store", path = %path.display(), "state store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        let open_err = |source| StoreError::Open {
            path: ":memory:".into(),
            source,
        };
        let conn = Connection::open_in_memory().map_err(open_err)?;
        conn.execute_batch(SCHEMA).map_err(open_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the guard leaves the connection itself intact.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert or replace the row's content in place.
    ///
    /// On conflict `is_read` is left as stored and `last_notified_at` keeps
    /// the later of the stored and incoming values.
    pub fn upsert(&self, state: &RecordState) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO issue_states (record_id, record_key, source_id, query_id, summary, status,
                                       last_modified, last_notified_at, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(record_id, source_id, query_id) DO UPDATE SET
                record_key       = excluded.record_key,
                summary          = excluded.summary,
                status           = excluded.status,
                last_modified    = excluded.last_modified,
                last_notified_at = MAX(COALESCE(issue_states.last_notified_at, excluded.last_notified_at),
                                       COALESCE(excluded.last_notified_at, issue_states.last_notified_at))",
            params![
                state.record_id,
                state.key,
                state.source_id.to_string(),
                state.query_id.to_string(),
                state.summary,
                state.status,
                state.last_modified.timestamp_millis(),
                state.last_notified_at.map(|t| t.timestamp_millis()),
                state.is_read,
            ],
        )?;
        Ok(())
    }

    /// Point lookup. A row that cannot be decoded is reported as absent.
    pub fn get(&self, key: &StateKey) -> StoreResult<Option<RecordState>> {
        let raw = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM issue_states
                     WHERE record_id = ?1 AND source_id = ?2 AND query_id = ?3"
                ),
                params![
                    key.record_id,
                    key.source_id.to_string(),
                    key.query_id.to_string()
                ],
                RawRow::from_row,
            )
            .optional()?;
        Ok(raw.and_then(|r| {
            let decoded = r.decode();
            if decoded.is_none() {
                tracing::warn!(target: "store", record = %key.record_id, "undecodable row treated as absent");
            }
            decoded
        }))
    }

    /// Stamp the notification time; never moves it backwards.
    pub fn mark_notified(&self, key: &StateKey, at: DateTime<Utc>) -> StoreResult<bool> {
        let n = self.conn().execute(
            "UPDATE issue_states SET last_notified_at = MAX(COALESCE(last_notified_at, ?4), ?4)
             WHERE record_id = ?1 AND source_id = ?2 AND query_id = ?3",
            params![
                key.record_id,
                key.source_id.to_string(),
                key.query_id.to_string(),
                at.timestamp_millis()
            ],
        )?;
        Ok(n > 0)
    }

    pub fn delete_for_source(&self, source_id: SourceId) -> StoreResult<usize> {
        let n = self.conn().execute(
            "DELETE FROM issue_states WHERE source_id = ?1",
            params![source_id.to_string()],
        )?;
        tracing::debug!(target: "store", source = %source_id, deleted = n, "cascade delete source");
        Ok(n)
    }

    pub fn delete_for_query(&self, query_id: QueryId) -> StoreResult<usize> {
        let n = self.conn().execute(
            "DELETE FROM issue_states WHERE query_id = ?1",
            params![query_id.to_string()],
        )?;
        tracing::debug!(target: "store", query = %query_id, deleted = n, "cascade delete query");
        Ok(n)
    }

    /// All rows, most recently modified first. Undecodable rows are skipped.
    pub fn all_states(&self) -> StoreResult<Vec<RecordState>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM issue_states ORDER BY last_modified DESC"
        ))?;
        let rows = stmt.query_map([], RawRow::from_row)?;

        let mut out = Vec::new();
        for row in rows {
            let raw = match row {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(target: "store", error = %e, "skipping unreadable row");
                    continue;
                }
            };
            let record_id = raw.record_id.clone();
            match raw.decode() {
                Some(state) => out.push(state),
                None => tracing::warn!(target: "store", record = %record_id, "skipping undecodable row"),
            }
        }
        Ok(out)
    }

    pub fn count(&self) -> StoreResult<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM issue_states", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    pub fn mark_read(&self, key: &StateKey) -> StoreResult<bool> {
        self.set_read(key, true)
    }

    /// Explicit reset of the acknowledgment flag.
    pub fn mark_unread(&self, key: &StateKey) -> StoreResult<bool> {
        self.set_read(key, false)
    }

    fn set_read(&self, key: &StateKey, read: bool) -> StoreResult<bool> {
        let n = self.conn().execute(
            "UPDATE issue_states SET is_read = ?4
             WHERE record_id = ?1 AND source_id = ?2 AND query_id = ?3",
            params![
                key.record_id,
                key.source_id.to_string(),
                key.query_id.to_string(),
                read
            ],
        )?;
        Ok(n > 0)
    }

    /// Mark every row whose record id is in `record_ids` as read, across sources and queries.
    /// One statement per distinct id inside a single transaction, so the id
    /// list is not bounded by SQLite's host-parameter limit.
    pub fn mark_many_read(&self, record_ids: &[String]) -> StoreResult<usize> {
        if record_ids.is_empty() {
            return Ok(0);
        }
        let ids: BTreeSet<&str> = record_ids.iter().map(String::as_str).collect();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut n = 0;
        {
            let mut stmt = tx.prepare("UPDATE issue_states SET is_read = 1 WHERE record_id = ?1")?;
            for id in ids {
                n += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(n)
    }

    pub fn mark_all_read(&self) -> StoreResult<usize> {
        Ok(self.conn().execute("UPDATE issue_states SET is_read = 1", [])?)
    }

    #[cfg(test)]
    fn exec_raw(&self, sql: &str) {
        self.conn().execute_batch(sql).unwrap();
    }
}
