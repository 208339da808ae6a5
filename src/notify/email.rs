use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{ChangeEvent, Notifier};

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} missing"))
}

impl EmailSender {
    pub fn from_env() -> Result<Self> {
        let host = env("SMTP_HOST")?;
        let user = env("SMTP_USER")?;
        let pass = env("SMTP_PASS")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = env("NOTIFY_EMAIL_FROM")?
            .parse::<Mailbox>()
            .context("invalid NOTIFY_EMAIL_FROM")?;
        let to = env("NOTIFY_EMAIL_TO")?
            .parse::<Mailbox>()
            .context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Self { mailer, from, to })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    async fn send(&self, ev: &ChangeEvent) -> Result<()> {
        let subject = format!("[{}] {}", ev.title(), ev.body());
        let body = format!(
            "{}\n{}\n\n{}\nDetected: {}\n",
            ev.body(),
            ev.subtitle(),
            ev.url,
            ev.ts.to_rfc3339()
        );

        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
