//! Database abstraction layer.
//!
//! Each domain gets its own store trait ([`UserStore`], [`ChatStore`],
//! [`MessageStore`], [`SessionStore`], [`ResetTokenStore`]), all implemented
//! by [`SqliteStore`].  To swap to another database (Postgres, MySQL, …),
//! implement the traits for a new type and change the concrete type in
//! [`crate::state::AppState`].
//!
//! All trait methods use `impl Future` in their signatures (stable since
//! Rust 1.75) so no extra `async-trait` crate is required here.

pub mod chat;
pub mod dao;
pub mod message;
pub mod session;
pub mod token;
pub mod user;

pub use dao::{AuthSession, Chat, Message, PasswordResetToken, User};

pub use chat::ChatStore;
pub use message::MessageStore;
pub use session::SessionStore;
pub use token::ResetTokenStore;
pub use user::UserStore;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// SQLite-backed store for all persisted chat state.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending
    /// migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://parley.db"` or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // In-memory SQLite databases exist per connection; a pool of one
        // keeps every query (and the migration run) on the same database.
        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

/// Parse an RFC 3339 column value, logging and substituting `now` on failure.
pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        tracing::warn!(raw = %raw, error = %e, "failed to parse stored timestamp; using now");
        Utc::now()
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────
