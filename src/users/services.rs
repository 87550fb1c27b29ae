use std::sync::Arc;

use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::FromRef;
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::error::{AccountError, AccountResult};
use crate::mailer::Notifier;
use crate::state::AppState;
use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, User, UserChanges, UserFilter};

pub const CONFIRMATION_CODE_LEN: usize = 5;
const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn hash_password(plain: &str) -> AccountResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// A malformed stored hash counts as a failed verification.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(error = %e, "argon2 parse hash error");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Uniform over `[A-Za-z0-9]`, drawn from the OS CSPRNG.
pub fn generate_confirmation_code() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(CONFIRMATION_CODE_LEN)
        .map(char::from)
        .collect()
}

fn validate_password(plain: &str) -> AccountResult<()> {
    if plain.len() < MIN_PASSWORD_LEN {
        return Err(AccountError::InvalidInput("Password too short"));
    }
    Ok(())
}

fn validated_email(raw: &str) -> AccountResult<String> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(AccountError::InvalidInput("Invalid email"));
    }
    Ok(email)
}

/// Issues and confirms emailed password-reset codes.
///
/// Issuing is two-phase: the code lives only in memory until the notifier
/// reports delivery, and is committed with a single-row update afterwards.
/// A failed delivery therefore leaves the stored code untouched. Confirming
/// is a compare-and-clear in the store, so a concurrent issue can never be
/// observed half-applied.
#[derive(Clone)]
pub struct ResetWorkflow {
    store: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
}

impl FromRef<AppState> for ResetWorkflow {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.store.clone(), state.notifier.clone())
    }
}

impl ResetWorkflow {
    pub fn new(store: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    #[instrument(skip(self))]
    pub async fn request_reset(&self, email: &str) -> AccountResult<()> {
        let email = normalize_email(email);
        if self.store.find_by_email(&email).await?.is_none() {
            warn!(email = %email, "reset requested for unknown email");
            return Err(AccountError::UserNotFound);
        }

        let code = generate_confirmation_code();
        if let Err(e) = self.notifier.send_confirmation_code(&email, &code).await {
            warn!(error = %e, email = %email, "confirmation code delivery failed");
            return Err(AccountError::NotificationFailed(format!("{e:#}")));
        }

        if self.store.set_confirmation_code(&email, &code).await? == 0 {
            warn!(email = %email, "user vanished before code was stored");
            return Err(AccountError::UserNotFound);
        }

        info!(email = %email, "confirmation code issued");
        Ok(())
    }

    #[instrument(skip(self, code))]
    pub async fn confirm_code(&self, email: &str, code: &str) -> AccountResult<()> {
        let email = normalize_email(email);
        if self.store.clear_confirmation_code(&email, code).await? == 1 {
            info!(email = %email, "confirmation code accepted");
            return Ok(());
        }

        match self.store.find_by_email(&email).await? {
            None => {
                warn!(email = %email, "code check for unknown email");
                Err(AccountError::UserNotFound)
            }
            Some(_) => {
                warn!(email = %email, "confirmation code mismatch");
                Err(AccountError::CodeMismatch)
            }
        }
    }
}

#[instrument(skip(store, password))]
pub async fn check_user(store: &dyn UserStore, email: &str, password: &str) -> AccountResult<User> {
    let email = normalize_email(email);
    let Some(user) = store.find_by_email(&email).await? else {
        warn!(email = %email, "check for unknown email");
        return Err(AccountError::UserNotFound);
    };
    if !verify_password(password, &user.password_hash) {
        warn!(email = %email, user_id = %user.id, "invalid password");
        return Err(AccountError::InvalidCredential);
    }
    Ok(user)
}

#[instrument(skip(store, password))]
pub async fn create_user(
    store: &dyn UserStore,
    login: &str,
    email: &str,
    password: &str,
) -> AccountResult<User> {
    let login = login.trim();
    if login.is_empty() {
        return Err(AccountError::InvalidInput("Login is required"));
    }
    let email = validated_email(email)?;
    validate_password(password)?;

    let filter = UserFilter {
        login: Some(login.to_string()),
        email: Some(email.clone()),
    };
    if store.find_by_login_or_email(&filter).await?.is_some() {
        warn!(login = %login, email = %email, "login or email already taken");
        return Err(AccountError::DuplicateUser);
    }

    let user = store
        .insert(NewUser {
            login: login.to_string(),
            email,
            password_hash: hash_password(password)?,
        })
        .await?;
    info!(user_id = %user.id, login = %user.login, "user created");
    Ok(user)
}

/// Raw edit request before normalization and hashing.
#[derive(Debug, Default)]
pub struct AccountEdit {
    pub login: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[instrument(skip(store, edit))]
pub async fn update_user(
    store: &dyn UserStore,
    filter: UserFilter,
    edit: AccountEdit,
) -> AccountResult<UserFilter> {
    let filter = UserFilter {
        login: filter.login.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
        email: filter.email.map(|e| normalize_email(&e)).filter(|e| !e.is_empty()),
    };
    if filter.is_empty() {
        return Err(AccountError::MissingFilter);
    }

    let mut changes = UserChanges::default();
    if let Some(login) = edit.login {
        let login = login.trim();
        if login.is_empty() {
            return Err(AccountError::InvalidInput("Login is required"));
        }
        changes.login = Some(login.to_string());
    }
    if let Some(email) = edit.email {
        changes.email = Some(validated_email(&email)?);
    }
    if let Some(password) = edit.password {
        validate_password(&password)?;
        changes.password_hash = Some(hash_password(&password)?);
    }

    let matched = if changes.is_empty() {
        store.find_by_login_or_email(&filter).await?.is_some()
    } else {
        store.update_fields(&filter, &changes).await? > 0
    };
    if !matched {
        warn!(filter = %filter.describe(), "update for unknown user");
        return Err(AccountError::UserNotFound);
    }

    info!(filter = %filter.describe(), "user changed");
    Ok(filter)
}

#[instrument(skip(store))]
pub async fn delete_user(store: &dyn UserStore, login: &str) -> AccountResult<String> {
    let login = login.trim();
    if login.is_empty() || store.delete_by_login(login).await? == 0 {
        warn!(login = %login, "delete for unknown login");
        return Err(AccountError::UserNotFound);
    }
    info!(login = %login, "user deleted");
    Ok(login.to_string())
}
