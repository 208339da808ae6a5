use anyhow::Result;

use super::{ChangeEvent, Notifier};

/// Writes every change to the tracing log. Always enabled.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, ev: &ChangeEvent) -> Result<()> {
        tracing::info!(
            target: "notify",
            verdict = ?ev.verdict,
            url = %ev.url,
            "{} | {} | {}",
            ev.title(),
            ev.body(),
            ev.subtitle()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
