//! Users, password checks and the user → session mapping.
//!
//! Each user owns a single persistent chat session, created on first use.
//! Passwords are stored as `salt$sha256(salt || password)` in hex.

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields accepted by [`AccountStore::update_profile`].
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub new_password: Option<String>,
}

/// Counts removed by [`AccountStore::cleanup_old_sessions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub sessions: u64,
    pub messages: u64,
}

pub struct AccountStore {
    pool: SqlitePool,
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{}${}", salt, hex::encode(hasher.finalize()))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, _)) => hash_password(password, salt) == stored,
        None => false,
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(PipelineError::Account(format!("invalid email address: {}", email)));
    }
    Ok(email)
}

fn duplicate_email(email: &str) -> PipelineError {
    PipelineError::Account(format!("an account with email {} already exists", email))
}

/// A write that lost a race on the unique email column.
fn email_conflict(err: sqlx::Error, email: &str) -> PipelineError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return duplicate_email(email);
        }
    }
    PipelineError::Storage(err)
}

fn require_name(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PipelineError::Account(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}

fn require_password(password: &str) -> Result<()> {
    if password.chars().count() < 6 {
        return Err(PipelineError::Account(
            "password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: row.get("id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserId> {
        let first_name = require_name("first name", first_name)?;
        let last_name = require_name("last name", last_name)?;
        let email = normalize_email(email)?;
        require_password(password)?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(duplicate_email(&email));
        }

        let salt = Uuid::new_v4().simple().to_string();
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO users (first_name, last_name, email, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&first_name)
        .bind(&last_name)
        .bind(&email)
        .bind(hash_password(password, &salt))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| email_conflict(e, &email))?;

        let id = result.last_insert_rowid();
        info!(user_id = id, email = %email, "registered user");
        Ok(id)
    }

    /// The user if `email` exists and `password` matches.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query(
            "SELECT id, first_name, last_name, email, password_hash, created_at, updated_at FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            let stored: String = row.get("password_hash");
            verify_password(password, &stored).then(|| user_from_row(&row))
        }))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, email, created_at, updated_at FROM users WHERE email = ?",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, email, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// The user's single session id, created on first use. Refreshes the
    /// session's `last_accessed` time.
    pub async fn session_for_user(&self, user_id: UserId) -> Result<String> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT session_id FROM user_sessions WHERE user_id = ? ORDER BY created_at ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let session_id = match existing {
            Some(session_id) => {
                sqlx::query(
                    "UPDATE user_sessions SET last_accessed = ? WHERE user_id = ? AND session_id = ?",
                )
                .bind(now)
                .bind(user_id)
                .bind(&session_id)
                .execute(&mut *tx)
                .await?;
                session_id
            }
            None => {
                let session_id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO user_sessions (user_id, session_id, session_name, created_at, last_accessed)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(user_id)
                .bind(&session_id)
                .bind("Main Chat")
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                info!(user_id, session_id = %session_id, "created session");
                session_id
            }
        };

        tx.commit().await?;
        Ok(session_id)
    }

    /// Remove a user's session and its chat history. Returns whether the
    /// session existed.
    pub async fn delete_session(&self, user_id: UserId, session_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM user_sessions WHERE user_id = ? AND session_id = ?")
            .bind(user_id)
            .bind(session_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed > 0 {
            sqlx::query("DELETE FROM chat_history WHERE session_id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Delete sessions not accessed for `days` days, with their history.
    pub async fn cleanup_old_sessions(&self, days: u32) -> Result<CleanupReport> {
        let cutoff = Utc::now().timestamp() - i64::from(days) * 86_400;
        let mut tx = self.pool.begin().await?;

        let messages = sqlx::query(
            "DELETE FROM chat_history WHERE session_id IN (SELECT session_id FROM user_sessions WHERE last_accessed < ?)",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sessions = sqlx::query("DELETE FROM user_sessions WHERE last_accessed < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        info!(days, sessions, messages, "cleaned up old sessions");
        Ok(CleanupReport { sessions, messages })
    }

    pub async fn update_profile(&self, user_id: UserId, update: &ProfileUpdate) -> Result<User> {
        let first_name = require_name("first name", &update.first_name)?;
        let last_name = require_name("last name", &update.last_name)?;
        let email = normalize_email(&update.email)?;

        if let Some(other) = self.find_by_email(&email).await? {
            if other.id != user_id {
                return Err(duplicate_email(&email));
            }
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE users SET first_name = ?, last_name = ?, email = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&first_name)
        .bind(&last_name)
        .bind(&email)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| email_conflict(e, &email))?
        .rows_affected();
        if updated == 0 {
            return Err(PipelineError::Account(format!("no user with id {}", user_id)));
        }

        if let Some(password) = &update.new_password {
            require_password(password)?;
            let salt = Uuid::new_v4().simple().to_string();
            sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
                .bind(hash_password(password, &salt))
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| PipelineError::Account(format!("no user with id {}", user_id)))
    }

    pub async fn user_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
