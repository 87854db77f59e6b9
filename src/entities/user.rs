use std::future::Future;

use chrono::Utc;

use crate::entities::{dao::User, parse_ts, SqliteStore};

/// Fields required to create a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
}

pub trait UserStore: Send + Sync + 'static {
    fn create_user(&self, new: NewUser) -> impl Future<Output = Result<User, sqlx::Error>> + Send;
    /// Look up by username *or* email (login form accepts either).
    fn find_by_login(
        &self,
        login: &str,
    ) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;
    fn find_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;
    fn get_user(&self, id: i64) -> impl Future<Output = Result<Option<User>, sqlx::Error>> + Send;
    fn username_taken(&self, username: &str)
        -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
    fn email_taken(&self, email: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
    fn update_display_name(
        &self,
        id: i64,
        display_name: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    fn update_theme(
        &self,
        id: i64,
        theme: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    fn update_password_hash(
        &self,
        id: i64,
        hash: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}

type UserRow = (i64, String, String, Option<String>, Option<String>, String, String);

fn row_to_user((id, username, email, password_hash, display_name, theme_preference, created_at): UserRow) -> User {
    User {
        id,
        username,
        email,
        password_hash,
        display_name,
        theme_preference,
        created_at: parse_ts(&created_at),
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, display_name, theme_preference, created_at";

impl UserStore for SqliteStore {
    async fn create_user(&self, new: NewUser) -> Result<User, sqlx::Error> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, display_name, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.display_name)
        .bind(created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(User {
            id: result.last_insert_rowid(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            display_name: new.display_name,
            theme_preference: "light".to_owned(),
            created_at,
        })
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?1"
        ))
        .bind(login)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_user))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))
                .bind(email)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(row_to_user))
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(row_to_user))
    }

    async fn username_taken(&self, username: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    async fn email_taken(&self, email: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    async fn update_display_name(&self, id: i64, display_name: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET display_name = ?1 WHERE id = ?2")
            .bind(display_name)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn update_theme(&self, id: i64, theme: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET theme_preference = ?1 WHERE id = ?2")
            .bind(theme)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn update_password_hash(&self, id: i64, hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = ?1 WHERE id = ?2")
            .bind(hash)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
