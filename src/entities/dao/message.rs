use chrono::{DateTime, Utc};

/// A row in the `messages` table.
///
/// The autoincrement `id` defines conversation order within a chat;
/// `created_at` is informational.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub content: String,
    pub is_user: bool,
    pub created_at: DateTime<Utc>,
}
