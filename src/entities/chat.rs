use std::future::Future;

use chrono::Utc;

use crate::entities::{dao::Chat, parse_ts, SqliteStore};

pub trait ChatStore: Send + Sync + 'static {
    fn create_chat(
        &self,
        user_id: i64,
        title: &str,
    ) -> impl Future<Output = Result<Chat, sqlx::Error>> + Send;
    /// Fetch a chat only when it is owned by `user_id`.
    fn get_chat(
        &self,
        id: i64,
        user_id: i64,
    ) -> impl Future<Output = Result<Option<Chat>, sqlx::Error>> + Send;
    /// All chats of a user, most recently updated first.
    fn list_chats(&self, user_id: i64)
        -> impl Future<Output = Result<Vec<Chat>, sqlx::Error>> + Send;
    fn rename_chat(
        &self,
        id: i64,
        title: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    /// Delete a chat; messages go with it (FK cascade).
    fn delete_chat(&self, id: i64) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    /// Delete every chat owned by `user_id`, returning how many went away.
    fn delete_all_chats(&self, user_id: i64)
        -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

type ChatRow = (i64, i64, String, String, String);

fn row_to_chat((id, user_id, title, created_at, updated_at): ChatRow) -> Chat {
    Chat {
        id,
        user_id,
        title,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    }
}

impl ChatStore for SqliteStore {
    async fn create_chat(&self, user_id: i64, title: &str) -> Result<Chat, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO chats (user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(user_id)
        .bind(title)
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(Chat {
            id: result.last_insert_rowid(),
            user_id,
            title: title.to_owned(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_chat(&self, id: i64, user_id: i64) -> Result<Option<Chat>, sqlx::Error> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM chats WHERE id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_chat))
    }

    async fn list_chats(&self, user_id: i64) -> Result<Vec<Chat>, sqlx::Error> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, user_id, title, created_at, updated_at \
             FROM chats WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(row_to_chat).collect())
    }

    async fn rename_chat(&self, id: i64, title: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete_chat(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM chats WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete_all_chats(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM chats WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
