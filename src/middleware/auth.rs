//! Bearer session-token authentication.
//!
//! Protected routes are wrapped in [`require_session`], which resolves the
//! `Authorization: Bearer <token>` header against the `auth_sessions` table
//! and injects the resolved [`CurrentUser`] as a request extension.
//! Handlers take `Extension(CurrentUser(user))`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::entities::{dao::User, SessionStore};
use crate::error::ServerError;
use crate::state::AppState;

/// The authenticated user for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Extract the bearer token from a request, if any.
pub fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req).map(str::to_owned) else {
        return ServerError::Unauthorized.into_response();
    };

    match state.store.find_session_user(&token).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(CurrentUser(user));
            next.run(req).await
        }
        Ok(None) => ServerError::Unauthorized.into_response(),
        Err(e) => {
            error!(error = %e, "session lookup failed");
            ServerError::Database(e).into_response()
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
