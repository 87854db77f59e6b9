//! Shared fixtures for in-crate tests.

use std::sync::Arc;

use futures::StreamExt;

use crate::config::Config;
use crate::entities::user::NewUser;
use crate::entities::{SqliteStore, User, UserStore};
use crate::gateway::{Fragment, FragmentStream, HistoryEntry, ModelGateway};
use crate::mailer::LogMailer;
use crate::state::AppState;

/// Gateway for tests that never reach the model.
pub struct NullGateway;

#[async_trait::async_trait]
impl ModelGateway for NullGateway {
    async fn generate_streaming(&self, _: &str, _: &[HistoryEntry]) -> FragmentStream {
        futures::stream::iter(Vec::<Fragment>::new()).boxed()
    }

    async fn generate(&self, _: &str, _: &[HistoryEntry]) -> String {
        String::new()
    }

    async fn generate_title(&self, _: &str) -> String {
        String::new()
    }
}

/// Fresh in-memory state with a [`NullGateway`] and the log-only mailer.
pub async fn state() -> Arc<AppState> {
    let store = SqliteStore::connect("sqlite::memory:").await.expect("in-memory store");
    Arc::new(AppState {
        config: Arc::new(Config::from_env()),
        store: Arc::new(store),
        gateway: Arc::new(NullGateway),
        mailer: Arc::new(LogMailer),
    })
}

/// Create an account named `name` with a derived email address.
pub async fn user(state: &AppState, name: &str, password_hash: Option<String>) -> User {
    state
        .store
        .create_user(NewUser {
            username: name.to_owned(),
            email: format!("{name}@example.com"),
            password_hash,
            display_name: None,
        })
        .await
        .expect("create user")
}
