// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod activity;
pub mod api;
pub mod change_detector;
pub mod config;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod poll;
pub mod secrets;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::notify::{ChangeEvent, Notifier, NotifierMux};
pub use crate::poll::scheduler::PollEngine;
pub use crate::poll::CycleExecutor;
pub use crate::store::StateStore;
