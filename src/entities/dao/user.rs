use chrono::{DateTime, Utc};

/// A row in the `users` table.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Argon2id PHC string; `None` for accounts without a password.
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    /// `"light"` or `"dark"`.
    pub theme_preference: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Name shown in the UI: the display name when set, else the username.
    pub fn visible_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }
}
