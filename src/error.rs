use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

pub type AccountResult<T> = Result<T, AccountError>;

/// Everything an account operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("User not found")]
    UserNotFound,
    #[error("User password incorrect")]
    InvalidCredential,
    #[error("Confirmation code incorrect")]
    CodeMismatch,
    #[error("User already exists")]
    DuplicateUser,
    #[error("Failed to deliver confirmation code: {0}")]
    NotificationFailed(String),
    #[error("Must fill login or email field")]
    MissingFilter,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AccountError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Self::Internal(err) => {
                error!(error = ?err, "account operation failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
