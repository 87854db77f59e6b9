use chrono::{DateTime, Utc};

/// A row in the `auth_sessions` table: one bearer login token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
