// src/config/registry.rs
//! Source registry loading. TOML (`[[sources]]`) or JSON (array or `{ "sources": [...] }`).
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::model::{Query, QueryId, Source, SourceId};

pub const ENV_SOURCES_PATH: &str = "ISSUE_WATCH_SOURCES_PATH";

fn default_interval() -> u32 {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawSource {
    id: Option<Uuid>,
    name: String,
    url: String,
    #[serde(default)]
    username: String,
    #[serde(default = "default_interval", alias = "poll_interval_minutes")]
    poll_interval: u32,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    token_env: Option<String>,
    #[serde(default, alias = "filters")]
    queries: Vec<RawQuery>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    id: Option<Uuid>,
    name: String,
    #[serde(alias = "jql")]
    expression: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonRegistry {
    List(Vec<RawSource>),
    Wrapped(RegistryFile),
}

/// Stable fallback id for entries without one, derived from names.
/// Renaming such an entry orphans its stored state, hence the warning.
fn derived_id(scope: &[&str]) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, scope.join("\u{1f}").as_bytes())
}

impl RawSource {
    fn into_source(self) -> Source {
        let name = self.name.trim().to_string();
        let id = self.id.unwrap_or_else(|| {
            tracing::warn!(source = %name, "source without id; deriving one from its name");
            derived_id(&["source", &name])
        });
        let queries = self
            .queries
            .into_iter()
            .map(|q| {
                let qname = q.name.trim().to_string();
                let qid = q.id.unwrap_or_else(|| {
                    tracing::warn!(source = %name, query = %qname, "query without id; deriving one from its name");
                    derived_id(&["query", &id.to_string(), &qname])
                });
                Query {
                    id: QueryId(qid),
                    name: qname,
                    expression: q.expression.trim().to_string(),
                    enabled: q.enabled,
                }
            })
            .collect();
        Source {
            id: SourceId(id),
            name,
            url: self.url.trim().trim_end_matches('/').to_string(),
            username: self.username.trim().to_string(),
            poll_interval: self.poll_interval,
            enabled: self.enabled,
            token_env: self.token_env.filter(|t| !t.trim().is_empty()),
            queries,
        }
    }
}

/// Rejects zero cadences, duplicate ids, and empty names or expressions.
pub fn validate_sources(sources: &[Source]) -> Result<()> {
    let mut seen = HashSet::new();
    for s in sources {
        if s.name.is_empty() {
            bail!("source {} has an empty name", s.id);
        }
        if s.poll_interval == 0 {
            bail!("source '{}': poll interval must be at least 1", s.name);
        }
        if !seen.insert(s.id) {
            bail!("duplicate source id {}", s.id);
        }
        let mut qseen = HashSet::new();
        for q in &s.queries {
            if !qseen.insert(q.id) {
                bail!("source '{}': duplicate query id {}", s.name, q.id);
            }
            if q.expression.is_empty() {
                bail!("source '{}': query '{}' has an empty expression", s.name, q.name);
            }
        }
    }
    Ok(())
}

/// Load the registry from an explicit path; the extension picks the format.
pub fn load_sources_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let sources = parse_sources(&content, ext.as_str())
        .with_context(|| format!("parsing sources from {}", path.display()))?;
    validate_sources(&sources)?;
    Ok(sources)
}

/// Load the registry using env var + fallbacks:
/// 1) $ISSUE_WATCH_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_sources_default() -> Result<Vec<Source>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<Source>> {
    let raw = match hint_ext {
        "toml" => parse_toml(s)?,
        "json" => parse_json(s)?,
        _ => parse_json(s).or_else(|_| parse_toml(s))?,
    };
    Ok(raw.into_iter().map(RawSource::into_source).collect())
}

fn parse_toml(s: &str) -> Result<Vec<RawSource>> {
    let v: RegistryFile = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<RawSource>> {
    let v: JsonRegistry = serde_json::from_str(s)?;
    Ok(match v {
        JsonRegistry::List(list) => list,
        JsonRegistry::Wrapped(file) => file.sources,
    })
}
