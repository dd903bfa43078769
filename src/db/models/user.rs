//! User and session models.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::{StoreError, ValidationErrors};

const MAX_FIELD_LEN: usize = 255;

lazy_static! {
    /// Loose shape check: something@something.tld, no whitespace
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

/// Input for inserting a user; the password is already hashed
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: String,
}

/// Trim and lower-case an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate an already-normalized email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Users must have an email address.".to_string());
    }

    if email.chars().count() > MAX_FIELD_LEN {
        return Err("Ensure this field has no more than 255 characters.".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Enter a valid email address.".to_string());
    }

    Ok(())
}

impl User {
    /// Insert a user, normalizing the email first.
    ///
    /// Fails with a validation error on an empty, malformed or already
    /// registered email.
    pub async fn create(db: &SqlitePool, new_user: &NewUser) -> Result<User, StoreError> {
        let email = normalize_email(&new_user.email);

        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_email(&email) {
            errors.add("email", e);
        }
        if new_user.name.chars().count() > MAX_FIELD_LEN {
            errors.add("name", "Ensure this field has no more than 255 characters.");
        }
        errors.finish()?;

        if Self::find_by_email(db, &email).await?.is_some() {
            return Err(StoreError::field(
                "email",
                "user with this email already exists.",
            ));
        }

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, is_staff, is_superuser)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&email)
        .bind(&new_user.password_hash)
        .bind(&new_user.name)
        .bind(new_user.is_staff)
        .bind(new_user.is_superuser)
        .fetch_one(db)
        .await
        .map_err(|e| match &e {
            // Lost a race with a concurrent registration
            sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE constraint failed") => {
                StoreError::field("email", "user with this email already exists.")
            }
            _ => StoreError::Database(e),
        })?;

        tracing::info!(user_id = user.id, email = %user.email, "User created");
        Ok(user)
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_all(db: &SqlitePool) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users ORDER BY id")
            .fetch_all(db)
            .await
    }

    /// Promote an existing account to staff and superuser
    pub async fn promote_to_superuser(db: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET is_staff = 1, is_superuser = 1, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn set_active(db: &SqlitePool, id: i64, active: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_active = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Delete a user; sessions, tags, ingredients and recipes cascade
    pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(user_id = id, "User deleted");
        }
        Ok(result.rows_affected() > 0)
    }
}

impl Session {
    pub async fn create(
        db: &SqlitePool,
        user_id: i64,
        token_hash: &str,
        expires_at: &str,
    ) -> Result<Session, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query_as(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, expires_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(db)
        .await
    }

    /// Find the unexpired session for a token hash
    pub async fn find_active(db: &SqlitePool, token_hash: &str) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM sessions WHERE token_hash = ? AND expires_at > datetime('now')",
        )
        .bind(token_hash)
        .fetch_optional(db)
        .await
    }

    pub async fn delete_expired_for_user(db: &SqlitePool, user_id: i64) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE user_id = ? AND expires_at <= datetime('now')")
                .bind(user_id)
                .execute(db)
                .await?;
        Ok(result.rows_affected())
    }
}
