use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use reqwest::Url;
use serde::Deserialize;

use crate::model::{Record, Source};
use crate::poll::types::{QueryError, QueryExecutor};
use crate::secrets::TokenStore;

const SEARCH_PATH: &str = "/rest/api/2/search";
const MYSELF_PATH: &str = "/rest/api/2/myself";
const MAX_RESULTS: &str = "100";
const FIELDS: &str = "summary,status,updated,assignee,reporter,priority";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    id: String,
    key: String,
    fields: IssueFields,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: String,
    status: Named,
    updated: String,
    assignee: Option<Person>,
    reporter: Option<Person>,
    priority: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    display_name: String,
}

/// Jira reports `2025-01-01T10:00:00.000+0000`; RFC 3339 is accepted too.
/// Unparseable values count as "modified now".
fn parse_updated(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(ts))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::debug!(target: "poll", updated = ts, "unparseable timestamp, using now");
            Utc::now()
        })
}

impl From<Issue> for Record {
    fn from(issue: Issue) -> Self {
        let f = issue.fields;
        let mut fields = BTreeMap::new();
        if let Some(a) = f.assignee {
            fields.insert("assignee".to_string(), a.display_name);
        }
        if let Some(r) = f.reporter {
            fields.insert("reporter".to_string(), r.display_name);
        }
        if let Some(p) = f.priority {
            fields.insert("priority".to_string(), p.name);
        }
        Record {
            id: issue.id,
            key: issue.key,
            summary: f.summary,
            status: f.status.name,
            last_modified: parse_updated(&f.updated),
            fields,
        }
    }
}

fn decode_search(body: &str) -> Result<Vec<Record>, QueryError> {
    let resp: SearchResponse = serde_json::from_str(body).map_err(|e| QueryError::Decode(e.to_string()))?;
    Ok(resp.issues.into_iter().map(Record::from).collect())
}

fn endpoint(source: &Source, path: &str) -> Result<Url, QueryError> {
    let base = source.url.trim().trim_end_matches('/');
    let url = Url::parse(&format!("{base}{path}")).map_err(|_| QueryError::InvalidUrl(source.url.clone()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(QueryError::InvalidUrl(source.url.clone())),
    }
}

/// Jira REST v2 search with bearer-token auth.
pub struct JiraExecutor {
    client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
}

impl JiraExecutor {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_timeout(tokens, Duration::from_secs(30))
    }

    pub fn with_timeout(tokens: Arc<dyn TokenStore>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, tokens }
    }

    fn token(&self, source: &Source) -> Result<String, QueryError> {
        self.tokens.token_for(source).ok_or(QueryError::MissingToken)
    }

    async fn get(&self, url: Url, token: &str) -> Result<reqwest::Response, QueryError> {
        self.client
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))
    }

    /// Checks that the URL and token are accepted. Non-2xx answers yield `Ok(false)`.
    pub async fn test_connection(&self, source: &Source) -> Result<bool, QueryError> {
        let url = endpoint(source, MYSELF_PATH)?;
        let token = self.token(source)?;
        let resp = self.get(url, &token).await?;
        Ok(resp.status().is_success())
    }
}

#[async_trait]
impl QueryExecutor for JiraExecutor {
    async fn search(&self, source: &Source, expression: &str) -> Result<Vec<Record>, QueryError> {
        let t0 = std::time::Instant::now();
        let mut url = endpoint(source, SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("jql", expression)
            .append_pair("maxResults", MAX_RESULTS)
            .append_pair("fields", FIELDS);
        let token = self.token(source)?;

        let resp = self.get(url, &token).await.inspect_err(|e| {
            tracing::warn!(target: "poll", source = %source.name, error = %e, "jira http error");
            counter!("provider_errors_total", "provider" => "jira").increment(1);
        })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| QueryError::Network(e.to_string()))?;
        if !status.is_success() {
            counter!("provider_errors_total", "provider" => "jira").increment(1);
            return Err(QueryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let records = decode_search(&body)?;
        histogram!("provider_fetch_ms", "provider" => "jira").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "jira"
    }
}
