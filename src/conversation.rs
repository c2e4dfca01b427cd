//! Per-session chat history.
//!
//! History is append-only; [`ConversationStore::clear`] is the only way
//! to remove messages and it deletes them outright. A session id that was
//! never written to reads as an empty history.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{PipelineError, Result};
use crate::models::{ConversationTurn, Role};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one message. Atomic per call.
    async fn append(&self, session_id: &str, role: Role, text: &str) -> Result<()>;

    /// Append a question and its answer together; either both are stored
    /// or neither is.
    async fn append_exchange(&self, session_id: &str, question: &str, answer: &str)
        -> Result<()>;

    /// Messages of `session_id` in insertion order.
    async fn history(&self, session_id: &str) -> Result<Vec<ConversationTurn>>;

    /// Delete every message of `session_id`. Returns the number removed.
    async fn clear(&self, session_id: &str) -> Result<u64>;

    /// Number of sessions with at least one message.
    async fn session_count(&self) -> Result<u64>;

    async fn message_count(&self) -> Result<u64>;
}

/// History in the `chat_history` table.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(&self, session_id: &str, role: Role, text: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_history (session_id, role, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(text)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for (role, text) in [(Role::Human, question), (Role::Assistant, answer)] {
            sqlx::query(
                "INSERT INTO chat_history (session_id, role, message, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(role.as_str())
            .bind(text)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT role, message, created_at FROM chat_history WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok(ConversationTurn {
                    role: role.parse().map_err(PipelineError::History)?,
                    content: row.get("message"),
                    created_at: timestamp(row.get("created_at")),
                })
            })
            .collect()
    }

    async fn clear(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_history WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn session_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT session_id) FROM chat_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn message_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Process-local history, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> PipelineError {
        PipelineError::History("conversation lock poisoned".to_string())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(&self, session_id: &str, role: Role, text: &str) -> Result<()> {
        let turn = ConversationTurn {
            role,
            content: text.to_string(),
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .map_err(|_| Self::poisoned())?
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(ConversationTurn::human(question));
        turns.push(ConversationTurn::assistant(answer));
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .sessions
            .read()
            .map_err(|_| Self::poisoned())?
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<u64> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(session_id)
            .map(|turns| turns.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }

    async fn session_count(&self) -> Result<u64> {
        let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
        Ok(sessions.values().filter(|t| !t.is_empty()).count() as u64)
    }

    async fn message_count(&self) -> Result<u64> {
        let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
        Ok(sessions.values().map(|t| t.len() as u64).sum())
    }
}
