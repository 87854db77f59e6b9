use std::future::Future;

use chrono::Utc;

use crate::entities::{dao::Message, parse_ts, SqliteStore};

pub trait MessageStore: Send + Sync + 'static {
    /// Append a message and bump the owning chat's `updated_at`, atomically.
    fn append_message(
        &self,
        chat_id: i64,
        content: &str,
        is_user: bool,
    ) -> impl Future<Output = Result<Message, sqlx::Error>> + Send;

    /// All messages of a chat in conversation order.
    fn list_messages(
        &self,
        chat_id: i64,
    ) -> impl Future<Output = Result<Vec<Message>, sqlx::Error>> + Send;

    /// Retry commit: optionally delete every message with id greater than
    /// `truncate_after`, append the regenerated assistant message, and bump
    /// the chat's `updated_at` — all in one transaction.
    fn truncate_after_and_append(
        &self,
        chat_id: i64,
        truncate_after: Option<i64>,
        content: &str,
    ) -> impl Future<Output = Result<Message, sqlx::Error>> + Send;
}

type MessageRow = (i64, i64, String, i64, String);

fn row_to_message((id, chat_id, content, is_user, created_at): MessageRow) -> Message {
    Message {
        id,
        chat_id,
        content,
        is_user: is_user != 0,
        created_at: parse_ts(&created_at),
    }
}

impl MessageStore for SqliteStore {
    async fn append_message(
        &self,
        chat_id: i64,
        content: &str,
        is_user: bool,
    ) -> Result<Message, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;
        let result = sqlx::query(
            "INSERT INTO messages (chat_id, content, is_user, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(chat_id)
        .bind(content)
        .bind(is_user)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
            .bind(now.to_rfc3339())
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Message {
            id: result.last_insert_rowid(),
            chat_id,
            content: content.to_owned(),
            is_user,
            created_at: now,
        })
    }

    async fn list_messages(&self, chat_id: i64) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, content, is_user, created_at \
             FROM messages WHERE chat_id = ?1 ORDER BY id ASC",
        )
        .bind(chat_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    async fn truncate_after_and_append(
        &self,
        chat_id: i64,
        truncate_after: Option<i64>,
        content: &str,
    ) -> Result<Message, sqlx::Error> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;
        if let Some(anchor_id) = truncate_after {
            sqlx::query("DELETE FROM messages WHERE chat_id = ?1 AND id > ?2")
                .bind(chat_id)
                .bind(anchor_id)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query(
            "INSERT INTO messages (chat_id, content, is_user, created_at) VALUES (?1, ?2, 0, ?3)",
        )
        .bind(chat_id)
        .bind(content)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
            .bind(now.to_rfc3339())
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Message {
            id: result.last_insert_rowid(),
            chat_id,
            content: content.to_owned(),
            is_user: false,
            created_at: now,
        })
    }
}
