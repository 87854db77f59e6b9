//! Account routes: register, login, logout, password reset.
//!
//! These are collaborators of the chat pipeline rather than part of it;
//! they exist so the "current authenticated user" the pipeline requires
//! can actually be established.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};
use utoipa::OpenApi;
use validator::Validate;

use crate::entities::{user::NewUser, ResetTokenStore, SessionStore, UserStore};
use crate::error::ServerError;
use crate::schemas::auth::{
    AuthResponse, LoginRequest, RegisterRequest, ResetPasswordConfirm, ResetPasswordRequest,
};
use crate::state::AppState;

/// Lifetime of a password-reset token.
const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Length of opaque session / reset tokens.
const TOKEN_LEN: usize = 43;

#[derive(OpenApi)]
#[openapi(
    paths(register, login, logout, reset_password_request, reset_password),
    components(schemas(
        RegisterRequest,
        LoginRequest,
        ResetPasswordRequest,
        ResetPasswordConfirm,
        AuthResponse
    ))
)]
pub struct AuthApi;

/// Routes reachable without a session.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/reset_password_request", post(reset_password_request))
        .route("/reset_password", post(reset_password))
}

/// Routes that require an active session.
pub fn session_router() -> Router<Arc<AppState>> {
    Router::new().route("/logout", post(logout))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/api/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid or conflicting registration data"),
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    req.validate()?;
    if req.password != req.confirm_password {
        return Err(ServerError::Validation("Passwords do not match".into()));
    }
    if state.store.username_taken(&req.username).await? {
        return Err(ServerError::Validation(
            "Username already exists. Please choose a different one.".into(),
        ));
    }
    if state.store.email_taken(&req.email).await? {
        return Err(ServerError::Validation(
            "Email already registered. Please use a different email.".into(),
        ));
    }

    let display_name = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let user = match state
        .store
        .create_user(NewUser {
            username: req.username.clone(),
            email: req.email.clone(),
            password_hash: Some(hash_password(&req.password)?),
            display_name: display_name.map(str::to_owned),
        })
        .await
    {
        Ok(user) => user,
        // The taken-probes above race with the INSERT; a concurrent
        // duplicate registration lands here instead.
        Err(e) if is_unique_violation(&e) => {
            return Err(ServerError::Validation(
                "Username or email already registered. Please choose different credentials."
                    .into(),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    info!(user_id = user.id, "account registered");

    let token = issue_session(&state, user.id).await?;
    Ok(Json(AuthResponse { token, user: user.to_response() }))
}

#[utoipa::path(
    post,
    path = "/api/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded", body = AuthResponse),
        (status = 401, description = "Invalid username/email or password"),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    // The login field accepts username or email; the error does not reveal
    // which part was wrong.
    let user = state
        .store
        .find_by_login(req.username.trim())
        .await?
        .filter(|u| {
            u.password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(&req.password, hash))
        })
        .ok_or(ServerError::Unauthorized)?;

    let token = issue_session(&state, user.id).await?;
    Ok(Json(AuthResponse { token, user: user.to_response() }))
}

#[utoipa::path(
    post,
    path = "/api/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Session revoked", body = serde_json::Value),
        (status = 401, description = "No active session"),
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ServerError::Unauthorized)?;
    state.store.delete_auth_session(token).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[utoipa::path(
    post,
    path = "/api/reset_password_request",
    tag = "auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Acknowledged whether or not the account exists"),
    )
)]
pub async fn reset_password_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    req.validate()?;

    if let Some(user) = state.store.find_by_email(req.email.trim()).await? {
        let token = random_token();
        let expires_at = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
        state.store.create_reset_token(user.id, &token, expires_at).await?;

        let reset_link = format!("{}/reset_password?token={}", state.config.public_url, token);
        if let Err(e) = state.mailer.send_password_reset(&user.email, &reset_link).await {
            warn!(error = %e, "failed to deliver password reset email");
        }
    }

    // Neutral response: never disclose whether the email is registered.
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "If an account with this email exists, you will receive a password reset link.",
    })))
}

#[utoipa::path(
    post,
    path = "/api/reset_password",
    tag = "auth",
    request_body = ResetPasswordConfirm,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid, used, or expired token"),
    )
)]
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordConfirm>,
) -> Result<Json<serde_json::Value>, ServerError> {
    req.validate()?;
    if req.password != req.confirm_password {
        return Err(ServerError::Validation("Passwords do not match".into()));
    }

    let token = state
        .store
        .find_reset_token(req.token.trim())
        .await?
        .filter(|t| !t.is_expired(Utc::now()))
        .ok_or_else(|| {
            ServerError::Validation("Reset token has expired or is invalid.".into())
        })?;

    let hash = hash_password(&req.password)?;
    state.store.redeem_reset_token(token.user_id, &hash).await?;
    info!(user_id = token.user_id, "password reset completed");
    Ok(Json(serde_json::json!({ "success": true })))
}

// ── Credential helpers ────────────────────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String, ServerError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServerError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

async fn issue_session(state: &AppState, user_id: i64) -> Result<String, ServerError> {
    let token = random_token();
    let expires_at = Utc::now() + Duration::hours(state.config.session_ttl_hours);
    state.store.create_auth_session(user_id, &token, expires_at).await?;
    Ok(token)
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
