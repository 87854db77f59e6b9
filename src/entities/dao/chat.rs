use chrono::{DateTime, Utc};

/// A row in the `chats` table.
///
/// `updated_at` tracks the most recent message write so that chat lists
/// can be ordered by recency.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
