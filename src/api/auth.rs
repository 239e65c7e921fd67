//! Authentication API endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, Caller, JsonBody};
use super::AppState;
use crate::auth::accounts::Account;
use crate::directory::{Identity, Role};

/// Build auth router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

/// Registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// `player` (default) or `dm`
    #[serde(default)]
    pub role: Option<String>,
}

/// Authentication response (for register and login)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub account_id: String,
    pub username: String,
    pub role: Role,
}

impl AuthResponse {
    fn new(account: Account, token: String) -> Self {
        Self {
            token,
            account_id: account.id,
            username: account.username,
            role: account.role,
        }
    }
}

/// Register a new account
async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = match req.role.as_deref() {
        None => Role::Player,
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|_| ApiError::BadRequest(format!("unknown role: {raw}")))?,
    };

    let (account, token) = state
        .accounts
        .create_account(&req.username, &req.password, role)
        .await?;
    Ok((StatusCode::CREATED, Json(AuthResponse::new(account, token))))
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login with username and password
async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (account, token) = state.accounts.login(&req.username, &req.password).await?;
    Ok(Json(AuthResponse::new(account, token)))
}

/// Logout request
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

/// Logout response
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Logout by invalidating token
async fn logout(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LogoutRequest>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let success = state.accounts.logout(&req.token).await?;
    Ok(Json(LogoutResponse { success }))
}

/// The caller's own identity
async fn me(Caller(identity): Caller) -> Json<Identity> {
    Json(identity)
}
