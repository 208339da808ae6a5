//! Notify/no-notify decision for a freshly fetched record.
//!
//! Pure logic, no I/O. The comparison runs on the tracker-reported
//! modification time, so two polls of an unmodified record never re-notify.

use serde::Serialize;

use crate::model::{Record, RecordState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    New,
    Changed,
    Unchanged,
}

impl Verdict {
    pub fn notifies(self) -> bool {
        !matches!(self, Verdict::Unchanged)
    }
}

/// - no previous row: `New`
/// - previous row never notified: `Changed` (a crash between persist and notify must not lose it)
/// - otherwise `Changed` iff modified strictly after the last notification; ties stay `Unchanged`
pub fn decide(record: &Record, previous: Option<&RecordState>) -> Verdict {
    let Some(prev) = previous else {
        return Verdict::New;
    };
    match prev.last_notified_at {
        None => Verdict::Changed,
        Some(notified) if record.last_modified > notified => Verdict::Changed,
        Some(_) => Verdict::Unchanged,
    }
}
