use std::future::Future;

use chrono::{DateTime, Utc};

use crate::entities::{dao::User, parse_ts, SqliteStore, UserStore};

pub trait SessionStore: Send + Sync + 'static {
    fn create_auth_session(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Resolve a bearer token to its user.  Returns `None` for unknown or
    /// expired tokens.
    fn find_session_user(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;

    /// Revoke a token (logout).  Unknown tokens are a no-op.
    fn delete_auth_session(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl SessionStore for SqliteStore {
    async fn create_auth_session(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO auth_sessions (user_id, token, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(token)
        .bind(Utc::now().to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_session_user(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT user_id, expires_at FROM auth_sessions WHERE token = ?1")
                .bind(token)
                .fetch_optional(self.pool())
                .await?;
        let Some((user_id, expires_at)) = row else {
            return Ok(None);
        };
        if parse_ts(&expires_at) < Utc::now() {
            // Expired rows are dead weight; drop them as they are seen.
            sqlx::query("DELETE FROM auth_sessions WHERE token = ?1")
                .bind(token)
                .execute(self.pool())
                .await?;
            return Ok(None);
        }
        self.get_user(user_id).await
    }

    async fn delete_auth_session(&self, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM auth_sessions WHERE token = ?1")
            .bind(token)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
