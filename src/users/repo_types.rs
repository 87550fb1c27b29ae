use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    #[serde(skip_serializing)]
    pub confirmation_code: Option<String>, // None = no reset in progress
    pub created_at: OffsetDateTime,
}

/// Fields required to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub password_hash: String,
}

/// Selects a single record by login or email. At least one should be set.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub login: Option<String>,
    pub email: Option<String>,
}

impl UserFilter {
    pub fn is_empty(&self) -> bool {
        self.login.is_none() && self.email.is_none()
    }

    pub fn matches(&self, user: &User) -> bool {
        self.login.as_deref() == Some(user.login.as_str())
            || self.email.as_deref() == Some(user.email.as_str())
    }

    /// Human-readable key for logs and confirmation text.
    pub fn describe(&self) -> &str {
        self.login
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or_default()
    }
}

/// Partial update; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub login: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.login.is_none() && self.email.is_none() && self.password_hash.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(login) = &self.login {
            user.login = login.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
    }
}
