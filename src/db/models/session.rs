//! Server-side session rows.

use sqlx::{FromRow, SqlitePool};

/// A row of the `sessions` table, keyed by the digest of the cookie token
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub return_to: Option<String>,
    pub flash_kind: Option<String>,
    pub flash_message: Option<String>,
    pub expires_at: String,
    pub created_at: String,
}

impl SessionRecord {
    /// Fetch a session that has not yet expired
    pub async fn find_live(
        db: &SqlitePool,
        token_hash: &str,
        now: &str,
    ) -> Result<Option<SessionRecord>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(token_hash)
            .bind(now)
            .fetch_optional(db)
            .await
    }

    pub async fn insert(&self, db: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, user_id, role, display_name, return_to, flash_kind, flash_message, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.token_hash)
        .bind(&self.user_id)
        .bind(&self.role)
        .bind(&self.display_name)
        .bind(&self.return_to)
        .bind(&self.flash_kind)
        .bind(&self.flash_message)
        .bind(&self.expires_at)
        .bind(&self.created_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Write back an existing row. Returns false when the row is gone, so a
    /// session deleted mid-request is never recreated.
    pub async fn update(&self, db: &SqlitePool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                user_id = ?,
                role = ?,
                display_name = ?,
                return_to = ?,
                flash_kind = ?,
                flash_message = ?,
                expires_at = ?
            WHERE token_hash = ?
            "#,
        )
        .bind(&self.user_id)
        .bind(&self.role)
        .bind(&self.display_name)
        .bind(&self.return_to)
        .bind(&self.flash_kind)
        .bind(&self.flash_message)
        .bind(&self.expires_at)
        .bind(&self.token_hash)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(db: &SqlitePool, token_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn delete_for_user(db: &SqlitePool, user_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(db: &SqlitePool, now: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}
