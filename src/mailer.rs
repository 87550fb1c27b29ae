use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::config::SmtpConfig;

const CONFIRMATION_SUBJECT: &str = "Password reset confirmation code";

/// Out-of-band delivery of confirmation codes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation_code(&self, to: &str, code: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = cfg.from.parse().context("parse SMTP_FROM")?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("smtp relay")?
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .port(cfg.port)
            .timeout(Some(Duration::from_secs(cfg.timeout_secs)))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Notifier for SmtpMailer {
    async fn send_confirmation_code(&self, to: &str, code: &str) -> anyhow::Result<()> {
        let message = confirmation_message(&self.from, to, code)?;
        self.transport
            .send(message)
            .await
            .context("smtp send")?;
        debug!(to = %to, "confirmation code mailed");
        Ok(())
    }
}

fn confirmation_message(from: &Mailbox, to: &str, code: &str) -> anyhow::Result<Message> {
    let to: Mailbox = to.parse().context("parse recipient address")?;
    let body = format!(
        "Hello,\n\n\
        A password reset was requested for your account.\n\n\
        Your confirmation code is: {code}\n\n\
        If you did not request this reset, you can ignore this email.\n"
    );
    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(CONFIRMATION_SUBJECT)
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .context("build confirmation email")
}

/// Writes codes to the log instead of sending them. Local development only.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Notifier for LogMailer {
    async fn send_confirmation_code(&self, to: &str, code: &str) -> anyhow::Result<()> {
        info!(to = %to, code = %code, "confirmation code (log mailer)");
        Ok(())
    }
}
