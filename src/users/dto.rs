use serde::Deserialize;

/// Request body for credential check.
#[derive(Debug, Deserialize)]
pub struct CheckUserRequest {
    pub email: String,
    pub password: String,
}

/// Request body for account creation.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub login: String,
    pub email: String,
    pub password: String,
}

/// Partial account edit; absent fields stay untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub login: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Query selecting the record to update.
#[derive(Debug, Default, Deserialize)]
pub struct UserLookup {
    pub login: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckCodeQuery {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub login: String,
}
