use chrono::{DateTime, Utc};

/// A row in the `password_reset_tokens` table; single-use and
/// time-bounded.  Redeeming a token deletes the row, so existence
/// implies the token has never been used.
#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn is_expired(&self, now: chrono::DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
