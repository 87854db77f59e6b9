//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `PARLEY_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - Public `/api` account routes
//! - Session-protected `/api` chat and profile routes

pub mod auth;
pub mod chat;
pub mod doc;
pub mod health;
pub mod profile;

use std::sync::Arc;

use axum::middleware;
use axum::Router;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{auth::require_session, cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .merge(chat::router())
        .merge(profile::router())
        .merge(auth::session_router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let api_router = Router::new().merge(auth::public_router()).merge(protected);

    let mut app = Router::new()
        .merge(health::router())
        .nest("/api", api_router);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; disable with PARLEY_ENABLE_SWAGGER=false in
    // production to avoid exposing the API structure to potential attackers.
    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
