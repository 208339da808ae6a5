// src/config/mod.rs
pub mod registry;

use std::path::PathBuf;
use std::time::Duration;

pub use registry::{load_sources_default, load_sources_from, validate_sources};

pub const ENV_DB_PATH: &str = "ISSUE_WATCH_DB_PATH";
pub const ENV_POLL_UNIT_SECS: &str = "POLL_UNIT_SECS";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_ACTIVITY_CAPACITY: &str = "ACTIVITY_LOG_CAPACITY";
pub const ENV_METRICS_ENABLED: &str = "METRICS_ENABLED";

pub const DEFAULT_DB_PATH: &str = "state/issue_watch.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

/// Process-level settings. The source registry is loaded separately.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Length of one cadence unit; a source with `poll_interval = 5` polls every 5 units.
    pub cadence_unit: Duration,
    pub bind_addr: String,
    pub activity_capacity: usize,
    pub metrics_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            cadence_unit: Duration::from_secs(60),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            activity_capacity: crate::activity::DEFAULT_CAPACITY,
            metrics_enabled: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            db_path: std::env::var(ENV_DB_PATH)
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            cadence_unit: env_parse::<u64>(ENV_POLL_UNIT_SECS)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.cadence_unit),
            bind_addr: std::env::var(ENV_BIND_ADDR).unwrap_or(d.bind_addr),
            activity_capacity: env_parse(ENV_ACTIVITY_CAPACITY).unwrap_or(d.activity_capacity),
            metrics_enabled: std::env::var(ENV_METRICS_ENABLED)
                .map(|v| v != "0")
                .unwrap_or(d.metrics_enabled),
        }
    }
}
