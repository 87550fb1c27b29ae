use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{AccountError, AccountResult};
use crate::users::repo_types::{NewUser, User, UserChanges, UserFilter};

/// Keyed record store for user accounts. Every operation touches at most one row.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AccountResult<Option<User>>;

    async fn find_by_login_or_email(&self, filter: &UserFilter) -> AccountResult<Option<User>>;

    /// Fails with `DuplicateUser` when login or email is taken.
    async fn insert(&self, user: NewUser) -> AccountResult<User>;

    /// Returns rows affected; zero means nothing matched the filter.
    async fn update_fields(&self, filter: &UserFilter, changes: &UserChanges) -> AccountResult<u64>;

    async fn set_confirmation_code(&self, email: &str, code: &str) -> AccountResult<u64>;

    /// Clears the code only if it currently equals `expected`.
    async fn clear_confirmation_code(&self, email: &str, expected: &str) -> AccountResult<u64>;

    async fn delete_by_login(&self, login: &str) -> AccountResult<u64>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AccountError {
    move |e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return AccountError::DuplicateUser;
            }
        }
        AccountError::Internal(anyhow::Error::new(e).context(context))
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    /// Find a user by email.
    async fn find_by_email(&self, email: &str) -> AccountResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, email, password_hash, confirmation_code, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(db_error("find user by email"))?;
        Ok(user)
    }

    async fn find_by_login_or_email(&self, filter: &UserFilter) -> AccountResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, email, password_hash, confirmation_code, created_at
            FROM users
            WHERE login = $1 OR email = $2
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(filter.login.as_deref())
        .bind(filter.email.as_deref())
        .fetch_optional(&self.db)
        .await
        .map_err(db_error("find user by login or email"))?;
        Ok(user)
    }

    /// Create a new user with hashed password.
    async fn insert(&self, user: NewUser) -> AccountResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (login, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, login, email, password_hash, confirmation_code, created_at
            "#,
        )
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(db_error("insert user"))?;
        Ok(user)
    }

    async fn update_fields(&self, filter: &UserFilter, changes: &UserChanges) -> AccountResult<u64> {
        // Subselect pins the update to one row even if login and email hit different users.
        let result = sqlx::query(
            r#"
            UPDATE users
               SET login = COALESCE($1, login),
                   email = COALESCE($2, email),
                   password_hash = COALESCE($3, password_hash)
             WHERE id = (
                   SELECT id FROM users
                    WHERE login = $4 OR email = $5
                    ORDER BY created_at ASC
                    LIMIT 1
             )
            "#,
        )
        .bind(changes.login.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.password_hash.as_deref())
        .bind(filter.login.as_deref())
        .bind(filter.email.as_deref())
        .execute(&self.db)
        .await
        .map_err(db_error("update user"))?;
        Ok(result.rows_affected())
    }

    async fn set_confirmation_code(&self, email: &str, code: &str) -> AccountResult<u64> {
        let result = sqlx::query("UPDATE users SET confirmation_code = $2 WHERE email = $1")
            .bind(email)
            .bind(code)
            .execute(&self.db)
            .await
            .map_err(db_error("set confirmation code"))?;
        Ok(result.rows_affected())
    }

    async fn clear_confirmation_code(&self, email: &str, expected: &str) -> AccountResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
               SET confirmation_code = NULL
             WHERE email = $1 AND confirmation_code = $2
            "#,
        )
        .bind(email)
        .bind(expected)
        .execute(&self.db)
        .await
        .map_err(db_error("clear confirmation code"))?;
        Ok(result.rows_affected())
    }

    async fn delete_by_login(&self, login: &str) -> AccountResult<u64> {
        let result = sqlx::query("DELETE FROM users WHERE login = $1")
            .bind(login)
            .execute(&self.db)
            .await
            .map_err(db_error("delete user"))?;
        Ok(result.rows_affected())
    }
}
