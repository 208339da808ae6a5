// src/notify/mod.rs
pub mod discord;
pub mod email;
pub mod log;
pub mod slack;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::change_detector::Verdict;
use crate::model::{QueryId, Record, Source, SourceId};

/// One detected change, with enough context for any sink to render it.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub source_id: SourceId,
    pub source_name: String,
    pub query_id: QueryId,
    pub query_name: String,
    pub verdict: Verdict,
    pub record: Record,
    /// Browse link for the record on its tracker.
    pub url: String,
    pub ts: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(source: &Source, query_id: QueryId, query_name: &str, record: &Record, verdict: Verdict) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            query_id,
            query_name: query_name.to_string(),
            verdict,
            record: record.clone(),
            url: source.browse_url(&record.key),
            ts: Utc::now(),
        }
    }

    pub fn title(&self) -> String {
        format!("{} - {}", self.source_name, self.query_name)
    }

    pub fn body(&self) -> String {
        format!("{}: {}", self.record.key, self.record.summary)
    }

    pub fn subtitle(&self) -> String {
        format!("Status: {}", self.record.status)
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &ChangeEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Fans one event out to every configured sink. A failing sink never stops the others.
pub struct NotifierMux {
    sinks: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new(sinks: Vec<Box<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    /// Log sink always; Slack/Discord/email only when their env is present.
    pub fn from_env() -> Self {
        let mut sinks: Vec<Box<dyn Notifier>> = vec![Box::new(log::LogNotifier)];
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            sinks.push(Box::new(slack::SlackNotifier::new(url)));
        }
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_URL") {
            sinks.push(Box::new(discord::DiscordNotifier::new(url)));
        }
        if std::env::var("SMTP_HOST").is_ok() {
            match email::EmailSender::from_env() {
                Ok(sender) => sinks.push(Box::new(sender)),
                Err(e) => tracing::warn!(target: "notify", error = %e, "email sink disabled"),
            }
        }
        tracing::info!(
            target: "notify",
            sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "notifier mux ready"
        );
        Self { sinks }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for NotifierMux {
    async fn send(&self, ev: &ChangeEvent) -> Result<()> {
        let mut failed = 0usize;
        for sink in &self.sinks {
            if let Err(e) = sink.send(ev).await {
                failed += 1;
                counter!("notify_failures_total").increment(1);
                tracing::warn!(target: "notify", sink = sink.name(), key = %ev.record.key, "notify failed: {e:#}");
            }
        }
        if failed > 0 && failed == self.sinks.len() {
            anyhow::bail!("all {failed} notification sinks failed");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}
