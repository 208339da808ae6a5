// src/poll/types.rs
use crate::model::{Record, Source};

/// Transport-level failures of a query. Any of these skips the query for this cycle.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid source URL: {0}")]
    InvalidUrl(String),
    #[error("no API token configured for source")]
    MissingToken,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Runs one query expression against a source and returns the full current result set.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn search(&self, source: &Source, expression: &str) -> Result<Vec<Record>, QueryError>;
    fn name(&self) -> &'static str;
}
