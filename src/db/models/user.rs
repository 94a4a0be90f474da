//! Member accounts and their credential columns.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::now;

/// Site-wide roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// The role an admin toggle switches to
    pub fn toggled(&self) -> Role {
        match self {
            Role::User => Role::Admin,
            Role::Admin => Role::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A row of the `users` table, credential included.
///
/// Never serialized; use [`UserSummary`] for anything that leaves the store.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub active: bool,
    pub reset_token: Option<String>,
    pub reset_token_expires: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// User record without any credential material
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub created_at: String,
}

impl UserSummary {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.fname, self.lname)
    }
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        let role = user.role();
        Self {
            id: user.id,
            fname: user.fname,
            lname: user.lname,
            email: user.email,
            role,
            active: user.active,
            created_at: user.created_at,
        }
    }
}

/// Validated input for creating an account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub password: String,
}

/// Emails are stored and compared lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    /// Parsed role; anything unrecognised is treated as the least privileged role.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::User)
    }

    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ? COLLATE NOCASE")
            .bind(normalize_email(email))
            .fetch_optional(db)
            .await
    }

    /// Current role straight from the store, `None` if the user no longer exists
    pub async fn role_of(db: &SqlitePool, id: &str) -> Result<Option<Role>, sqlx::Error> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(role.map(|r| r.parse().unwrap_or(Role::User)))
    }

    pub async fn list(db: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(db)
            .await
    }

    pub async fn admin_exists(db: &SqlitePool) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(db)
            .await?;
        Ok(count > 0)
    }

    pub async fn insert(
        db: &SqlitePool,
        new_user: &NewUser,
        password_hash: &str,
        role: Role,
    ) -> Result<User, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();

        sqlx::query(
            r#"
            INSERT INTO users (id, fname, lname, email, password, role, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(new_user.fname.trim())
        .bind(new_user.lname.trim())
        .bind(normalize_email(&new_user.email))
        .bind(password_hash)
        .bind(role.as_str())
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        Self::find_by_id(db, &id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Replace a legacy plaintext credential with its hash.
    ///
    /// Only applies while the row still holds `legacy`; returns false when a
    /// concurrent write (e.g. a password reset) got there first.
    pub async fn upgrade_legacy_password(
        db: &SqlitePool,
        id: &str,
        legacy: &str,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET password = ?, updated_at = ? WHERE id = ? AND password = ?",
        )
        .bind(password_hash)
        .bind(now())
        .bind(id)
        .bind(legacy)
        .execute(db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn update_password(
        db: &SqlitePool,
        id: &str,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Store a reset token digest, replacing any outstanding one
    pub async fn set_reset_token(
        db: &SqlitePool,
        id: &str,
        token_hash: &str,
        expires_at: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET reset_token = ?, reset_token_expires = ?, updated_at = ? WHERE id = ?",
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(now())
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Look up the owner of a live reset token
    pub async fn find_by_reset_token(
        db: &SqlitePool,
        token_hash: &str,
        now: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE reset_token = ? AND reset_token_expires > ?")
            .bind(token_hash)
            .bind(now)
            .fetch_optional(db)
            .await
    }

    /// Set a new credential and clear the reset token in one statement.
    ///
    /// Returns the user id, or `None` when no live token matched.
    pub async fn consume_reset_token(
        db: &SqlitePool,
        token_hash: &str,
        password_hash: &str,
        now: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            UPDATE users
            SET password = ?, reset_token = NULL, reset_token_expires = NULL, updated_at = ?
            WHERE reset_token = ? AND reset_token_expires > ?
            RETURNING id
            "#,
        )
        .bind(password_hash)
        .bind(now)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(db)
        .await
    }

    pub async fn update_profile(
        db: &SqlitePool,
        id: &str,
        fname: &str,
        lname: &str,
        email: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET fname = ?, lname = ?, email = ?, updated_at = ? WHERE id = ?")
            .bind(fname.trim())
            .bind(lname.trim())
            .bind(normalize_email(email))
            .bind(now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_active(db: &SqlitePool, id: &str, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_role(db: &SqlitePool, id: &str, role: Role) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(now())
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
