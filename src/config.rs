use anyhow::{bail, Context};

/// Backing engine for the user record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

/// How confirmation codes leave the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailMode {
    Smtp,
    Log,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub mail_mode: MailMode,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = match lookup("STORE").as_deref().unwrap_or("postgres") {
            "postgres" => StoreKind::Postgres,
            "memory" => StoreKind::Memory,
            other => bail!("unknown STORE value: {other}"),
        };

        let database_url = lookup("DATABASE_URL");
        if store == StoreKind::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when STORE=postgres");
        }

        let mail_mode = match lookup("MAIL_MODE").as_deref().unwrap_or("smtp") {
            "smtp" => MailMode::Smtp,
            "log" => MailMode::Log,
            other => bail!("unknown MAIL_MODE value: {other}"),
        };

        let smtp = match mail_mode {
            MailMode::Smtp => Some(SmtpConfig {
                host: lookup("SMTP_HOST").context("SMTP_HOST is required")?,
                port: lookup("SMTP_PORT")
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(587),
                username: lookup("SMTP_USERNAME").context("SMTP_USERNAME is required")?,
                password: lookup("SMTP_PASSWORD").context("SMTP_PASSWORD is required")?,
                from: lookup("SMTP_FROM").context("SMTP_FROM is required")?,
                timeout_secs: lookup("SMTP_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(10),
            }),
            MailMode::Log => None,
        };

        Ok(Self {
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: lookup("APP_PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8080),
            store,
            database_url,
            mail_mode,
            smtp,
        })
    }
}
