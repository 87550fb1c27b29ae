use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::{AppConfig, MailMode, StoreKind};
use crate::mailer::{LogMailer, Notifier, SmtpMailer};
use crate::users::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub async fn init(config: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn UserStore> = match config.store {
            StoreKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL missing")?;
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;

                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(PgUserStore::new(db))
            }
            StoreKind::Memory => {
                warn!("using in-memory user store; records are lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match (config.mail_mode, &config.smtp) {
            (MailMode::Smtp, Some(smtp)) => Arc::new(SmtpMailer::new(smtp)?),
            (MailMode::Smtp, None) => anyhow::bail!("SMTP mail mode without SMTP settings"),
            (MailMode::Log, _) => {
                warn!("using log mailer; confirmation codes are written to the log");
                Arc::new(LogMailer)
            }
        };

        info!(store = ?config.store, mail = ?config.mail_mode, "state initialized");
        Ok(Self { store, notifier })
    }

    pub fn from_parts(store: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }
}
