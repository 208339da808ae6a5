// src/secrets.rs
//! API token lookup. Storage itself lives outside the engine.

use crate::model::Source;

pub const TOKEN_ENV_PREFIX: &str = "ISSUE_WATCH_TOKEN_";

pub trait TokenStore: Send + Sync {
    fn token_for(&self, source: &Source) -> Option<String>;
}

/// Resolves `source.token_env` if set, else `ISSUE_WATCH_TOKEN_<uuid without dashes>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvTokenStore;

impl EnvTokenStore {
    pub fn default_var(source: &Source) -> String {
        format!("{TOKEN_ENV_PREFIX}{}", source.id.0.simple()).to_ascii_uppercase()
    }
}

impl TokenStore for EnvTokenStore {
    fn token_for(&self, source: &Source) -> Option<String> {
        let var = source
            .token_env
            .clone()
            .unwrap_or_else(|| Self::default_var(source));
        std::env::var(var).ok().filter(|t| !t.trim().is_empty())
    }
}

/// Fixed tokens keyed by source id; handy for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenStore {
    tokens: std::collections::HashMap<crate::model::SourceId, String>,
}

impl StaticTokenStore {
    pub fn with(mut self, source: crate::model::SourceId, token: impl Into<String>) -> Self {
        self.tokens.insert(source, token.into());
        self
    }
}

impl TokenStore for StaticTokenStore {
    fn token_for(&self, source: &Source) -> Option<String> {
        self.tokens.get(&source.id).cloned()
    }
}
