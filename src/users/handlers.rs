use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    routing::{delete, patch, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    error::{AccountError, AccountResult},
    state::AppState,
    users::{
        dto::{
            CheckCodeQuery, CheckUserRequest, CreateUserRequest, EmailQuery, LoginQuery,
            UpdateUserRequest, UserLookup,
        },
        repo_types::UserFilter,
        services::{self, AccountEdit, ResetWorkflow},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/check_user", post(check_user))
        .route("/reset_password", post(reset_password))
        .route("/check_code", post(check_code))
        .route("/create_user", post(create_user))
        .route("/update_user", patch(update_user))
        .route("/delete", delete(delete_user))
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> AccountResult<T> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            let detail = rejection.body_text();
            warn!(error = %detail, "rejected request body");
            Err(AccountError::MalformedRequest(detail))
        }
    }
}

fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> AccountResult<T> {
    match query {
        Ok(Query(args)) => Ok(args),
        Err(rejection) => {
            let detail = rejection.body_text();
            warn!(error = %detail, "rejected query string");
            Err(AccountError::MalformedRequest(detail))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn check_user(
    State(state): State<AppState>,
    payload: Result<Json<CheckUserRequest>, JsonRejection>,
) -> AccountResult<Json<String>> {
    let payload = parse_body(payload)?;
    let user = services::check_user(state.store.as_ref(), &payload.email, &payload.password).await?;
    Ok(Json(format!("User successfully checked: {}", user.email)))
}

#[instrument(skip(workflow, query))]
pub async fn reset_password(
    State(workflow): State<ResetWorkflow>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> AccountResult<Json<String>> {
    let query = parse_query(query)?;
    workflow.request_reset(&query.email).await?;
    Ok(Json(format!(
        "Password reset code sent to: {}",
        services::normalize_email(&query.email)
    )))
}

#[instrument(skip(workflow, query))]
pub async fn check_code(
    State(workflow): State<ResetWorkflow>,
    query: Result<Query<CheckCodeQuery>, QueryRejection>,
) -> AccountResult<Json<String>> {
    let query = parse_query(query)?;
    workflow.confirm_code(&query.email, &query.code).await?;
    Ok(Json(format!(
        "User successfully checked: {}",
        services::normalize_email(&query.email)
    )))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AccountResult<Json<String>> {
    let payload = parse_body(payload)?;
    let user = services::create_user(
        state.store.as_ref(),
        &payload.login,
        &payload.email,
        &payload.password,
    )
    .await?;
    Ok(Json(format!("User successfully created: {}", user.login)))
}

#[instrument(skip(state, lookup, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    lookup: Result<Query<UserLookup>, QueryRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AccountResult<Json<String>> {
    let lookup = parse_query(lookup)?;
    let payload = parse_body(payload)?;
    let filter = UserFilter {
        login: lookup.login,
        email: lookup.email,
    };
    let edit = AccountEdit {
        login: payload.login,
        email: payload.email,
        password: payload.password,
    };
    let filter = services::update_user(state.store.as_ref(), filter, edit).await?;
    Ok(Json(format!("User successfully changed: {}", filter.describe())))
}

#[instrument(skip(state, query))]
pub async fn delete_user(
    State(state): State<AppState>,
    query: Result<Query<LoginQuery>, QueryRejection>,
) -> AccountResult<Json<String>> {
    let query = parse_query(query)?;
    let login = services::delete_user(state.store.as_ref(), &query.login).await?;
    Ok(Json(format!("User successfully deleted: {login}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app::build_app,
        error::AccountError,
        mailer::testing::RecordingMailer,
        users::{
            memory::MemoryUserStore,
            repo::UserStore,
            repo_types::{NewUser, User, UserChanges},
        },
    };

    struct Harness {
        store: Arc<MemoryUserStore>,
        mailer: Arc<RecordingMailer>,
        app: Router,
    }

    fn harness_with(mailer: RecordingMailer) -> Harness {
        let store = Arc::new(MemoryUserStore::new());
        let mailer = Arc::new(mailer);
        let state = AppState::from_parts(store.clone(), mailer.clone());
        Harness {
            store,
            mailer,
            app: build_app(state),
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingMailer::default())
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn sign_up(app: &Router, login: &str, email: &str) {
        let (status, _) = call(
            app,
            "POST",
            "/api/users/create_user",
            Some(serde_json::json!({ "login": login, "email": email, "password": "password-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_check_user() {
        let h = harness();
        sign_up(&h.app, "alice", "alice@example.com").await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/check_user",
            Some(serde_json::json!({ "email": "alice@example.com", "password": "password-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("alice@example.com"));

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/check_user",
            Some(serde_json::json!({ "email": "alice@example.com", "password": "nope-nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "User password incorrect");
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let h = harness();
        sign_up(&h.app, "alice", "alice@example.com").await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/create_user",
            Some(serde_json::json!({
                "login": "other",
                "email": "alice@example.com",
                "password": "password-1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "User already exists");
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn reset_and_confirm_flow() {
        let h = harness();
        sign_up(&h.app, "alice", "alice@example.com").await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/reset_password?email=alice@example.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("alice@example.com"));
        let code = h.mailer.last_code_for("alice@example.com").expect("code mailed");

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/check_code?email=alice@example.com&code=wrong",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Confirmation code incorrect");

        let uri = format!("/api/users/check_code?email=alice@example.com&code={code}");
        let (status, _) = call(&h.app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let user = h.store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert!(user.confirmation_code.is_none());

        let (status, _) = call(&h.app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_for_unknown_email_is_400_and_silent() {
        let h = harness();
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/reset_password?email=ghost@example.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "User not found");
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn reset_delivery_failure_is_400() {
        let h = harness_with(RecordingMailer::failing());
        sign_up(&h.app, "alice", "alice@example.com").await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/reset_password?email=alice@example.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("mail relay unavailable"));
        let user = h.store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert!(user.confirmation_code.is_none());
    }

    #[tokio::test]
    async fn update_requires_login_or_email() {
        let h = harness();
        sign_up(&h.app, "alice", "alice@example.com").await;

        let (status, body) = call(
            &h.app,
            "PATCH",
            "/api/users/update_user",
            Some(serde_json::json!({ "login": "alicia" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Must fill login or email field");

        let (status, _) = call(
            &h.app,
            "PATCH",
            "/api/users/update_user?login=alice",
            Some(serde_json::json!({ "login": "alicia" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let user = h.store.find_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(user.login, "alicia");

        let (status, body) = call(
            &h.app,
            "PATCH",
            "/api/users/update_user?login=alice",
            Some(serde_json::json!({ "login": "again" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "User not found");
    }

    #[tokio::test]
    async fn delete_by_login() {
        let h = harness();
        sign_up(&h.app, "alice", "alice@example.com").await;
        sign_up(&h.app, "bob", "bob@example.com").await;

        let (status, _) = call(&h.app, "DELETE", "/api/users/delete?login=ghost", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.store.len().await, 2);

        let (status, body) = call(&h.app, "DELETE", "/api/users/delete?login=alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("alice"));
        assert_eq!(h.store.len().await, 1);
        assert!(h.store.find_by_email("bob@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_body_field_is_400_with_detail() {
        let h = harness();
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/create_user",
            Some(serde_json::json!({ "login": "alice", "email": "alice@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("password"));
        assert_eq!(h.store.len().await, 0);
    }

    #[tokio::test]
    async fn body_without_json_content_type_is_400_with_detail() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(
                Request::post("/api/users/check_user")
                    .body(Body::from(r#"{"email":"a@example.com","password":"password-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn missing_query_field_is_400_with_detail() {
        let h = harness();
        sign_up(&h.app, "alice", "alice@example.com").await;

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/users/check_code?email=alice@example.com",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("code"));

        let (status, body) = call(&h.app, "DELETE", "/api/users/delete", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("login"));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_trims_login() {
        let h = harness();
        sign_up(&h.app, " alice", "alice@example.com").await;

        let (status, body) =
            call(&h.app, "DELETE", "/api/users/delete?login=%20alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "User successfully deleted: alice");
        assert_eq!(h.store.len().await, 0);
    }

    struct BrokenStore;

    fn broken<T>() -> Result<T, AccountError> {
        Err(AccountError::Internal(anyhow::anyhow!("connection refused")))
    }

    #[async_trait]
    impl UserStore for BrokenStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, AccountError> {
            broken()
        }
        async fn find_by_login_or_email(
            &self,
            _filter: &UserFilter,
        ) -> Result<Option<User>, AccountError> {
            broken()
        }
        async fn insert(&self, _user: NewUser) -> Result<User, AccountError> {
            broken()
        }
        async fn update_fields(
            &self,
            _filter: &UserFilter,
            _changes: &UserChanges,
        ) -> Result<u64, AccountError> {
            broken()
        }
        async fn set_confirmation_code(&self, _e: &str, _c: &str) -> Result<u64, AccountError> {
            broken()
        }
        async fn clear_confirmation_code(&self, _e: &str, _c: &str) -> Result<u64, AccountError> {
            broken()
        }
        async fn delete_by_login(&self, _login: &str) -> Result<u64, AccountError> {
            broken()
        }
    }

    #[tokio::test]
    async fn store_failures_surface_as_500() {
        let state = AppState::from_parts(Arc::new(BrokenStore), Arc::new(RecordingMailer::default()));
        let app = build_app(state);

        let (status, body) = call(
            &app,
            "POST",
            "/api/users/check_user",
            Some(serde_json::json!({ "email": "alice@example.com", "password": "password-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Internal server error");

        let (status, _) = call(
            &app,
            "POST",
            "/api/users/check_code?email=alice@example.com&code=12345",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
