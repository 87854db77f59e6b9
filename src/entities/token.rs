use std::future::Future;

use chrono::{DateTime, Utc};

use crate::entities::{dao::PasswordResetToken, parse_ts, SqliteStore};

pub trait ResetTokenStore: Send + Sync + 'static {
    fn create_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Look up a live reset token by its opaque value.  Expired rows are
    /// deleted as they are seen so the table cannot grow without bound.
    fn find_reset_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<PasswordResetToken>, sqlx::Error>> + Send;

    /// Install the new password hash and discard every outstanding reset
    /// token of the user, atomically.  Discarding rather than marking
    /// makes tokens single-use and keeps the table bounded.
    fn redeem_reset_token(
        &self,
        user_id: i64,
        new_hash: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

impl ResetTokenStore for SqliteStore {
    async fn create_reset_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO password_reset_tokens (user_id, token, created_at, expires_at) \
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

    async fn find_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, sqlx::Error> {
        let row: Option<(i64, i64, String, String, String)> = sqlx::query_as(
            "SELECT id, user_id, token, created_at, expires_at \
             FROM password_reset_tokens WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await?;
        let Some((id, user_id, token, created_at, expires_at)) = row else {
            return Ok(None);
        };
        let parsed = PasswordResetToken {
            id,
            user_id,
            token,
            created_at: parse_ts(&created_at),
            expires_at: parse_ts(&expires_at),
        };
        if parsed.is_expired(Utc::now()) {
            sqlx::query("DELETE FROM password_reset_tokens WHERE id = ?1")
                .bind(parsed.id)
                .execute(self.pool())
                .await?;
            return Ok(None);
        }
        Ok(Some(parsed))
    }

    async fn redeem_reset_token(&self, user_id: i64, new_hash: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(new_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
