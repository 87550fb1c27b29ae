use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AccountError, AccountResult};
use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, User, UserChanges, UserFilter};

/// In-process store used by `STORE=memory` and by tests.
/// Records are kept in insertion order, matching the Postgres store's `ORDER BY created_at`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

fn taken_by_other(users: &[User], skip: Uuid, login: Option<&str>, email: Option<&str>) -> bool {
    users.iter().filter(|u| u.id != skip).any(|u| {
        login == Some(u.login.as_str()) || email == Some(u.email.as_str())
    })
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> AccountResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_login_or_email(&self, filter: &UserFilter) -> AccountResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| filter.matches(u)).cloned())
    }

    async fn insert(&self, user: NewUser) -> AccountResult<User> {
        let mut users = self.users.write().await;
        if taken_by_other(&users, Uuid::nil(), Some(&user.login), Some(&user.email)) {
            return Err(AccountError::DuplicateUser);
        }
        let record = User {
            id: Uuid::new_v4(),
            login: user.login,
            email: user.email,
            password_hash: user.password_hash,
            confirmation_code: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.push(record.clone());
        Ok(record)
    }

    async fn update_fields(&self, filter: &UserFilter, changes: &UserChanges) -> AccountResult<u64> {
        let mut users = self.users.write().await;
        let Some(idx) = users.iter().position(|u| filter.matches(u)) else {
            return Ok(0);
        };
        let id = users[idx].id;
        if taken_by_other(&users, id, changes.login.as_deref(), changes.email.as_deref()) {
            return Err(AccountError::DuplicateUser);
        }
        changes.apply(&mut users[idx]);
        Ok(1)
    }

    async fn set_confirmation_code(&self, email: &str, code: &str) -> AccountResult<u64> {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|u| u.email == email) {
            Some(user) => {
                user.confirmation_code = Some(code.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn clear_confirmation_code(&self, email: &str, expected: &str) -> AccountResult<u64> {
        let mut users = self.users.write().await;
        match users
            .iter_mut()
            .find(|u| u.email == email && u.confirmation_code.as_deref() == Some(expected))
        {
            Some(user) => {
                user.confirmation_code = None;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_by_login(&self, login: &str) -> AccountResult<u64> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.login != login);
        Ok((before - users.len()) as u64)
    }
}
