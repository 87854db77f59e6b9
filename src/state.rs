//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::gateway::ModelGateway;
use crate::mailer::Mailer;

/// State shared across all HTTP handlers.
///
/// The gateway and mailer are trait objects constructed at the composition
/// root (`main`), so tests can assemble the same state with fakes.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Persistent chat transcript store.
    pub store: Arc<SqliteStore>,
    /// Language-model provider boundary.
    pub gateway: Arc<dyn ModelGateway>,
    /// Password-reset delivery boundary.
    pub mailer: Arc<dyn Mailer>,
}
