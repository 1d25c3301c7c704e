//! Durable chat session and message storage.
//!
//! Sessions are opaque UUIDv4 strings, issued once and never reused.
//! Messages belong to exactly one session and cascade with it; insertion
//! order is preserved by `(created_at, id)` so replay into the orchestrator
//! is exact.
//!
//! Concurrent chat requests against the same session are serialized
//! through [`SessionStore::turn_lock`], which the chat route holds across
//! the whole user-append → orchestrate → assistant-append sequence.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::models::{Role, SessionSummary, StoredMessage, TurnMetadata};

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a new session, anonymous when `owner` is `None`. Ownership
    /// is fixed at creation and never assigned retroactively.
    pub async fn create(&self, owner: Option<i64>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Append one message. Errors on an unknown session rather than
    /// silently dropping the turn.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<&TurnMetadata>,
    ) -> Result<()> {
        if !self.exists(session_id).await? {
            bail!("Session not found: {}", session_id);
        }

        let now = chrono::Utc::now().timestamp();
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO messages (session_id, role, content, metadata, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// The most recent `limit` messages, returned oldest-first so they can
    /// be replayed straight into the orchestrator.
    pub async fn history(&self, session_id: &str, limit: i64) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, metadata, created_at
            FROM messages
            WHERE session_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// The full conversation, oldest-first, for admin review.
    pub async fn transcript(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, metadata, created_at
            FROM messages
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Delete all messages in a session but keep the session itself.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        if !self.exists(session_id).await? {
            bail!("Session not found: {}", session_id);
        }

        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fully delete a session; messages cascade.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        if !self.exists(session_id).await? {
            bail!("Session not found: {}", session_id);
        }

        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        self.locks.lock().unwrap().remove(session_id);
        Ok(())
    }

    /// Session summaries with message counts, newest first.
    pub async fn list_sessions(&self, limit: i64, offset: i64) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.user_id, s.created_at, COUNT(m.id) AS message_count
            FROM sessions s
            LEFT JOIN messages m ON m.session_id = s.id
            GROUP BY s.id
            ORDER BY s.created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SessionSummary {
                session_id: row.get("id"),
                user_id: row.get("user_id"),
                created_at: row.get("created_at"),
                message_count: row.get("message_count"),
            })
            .collect())
    }

    /// Delete sessions older than `days`, cascading their messages.
    /// Intended for a scheduled sweep, not per-request use.
    pub async fn cleanup_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - days * 86_400;

        let result = sqlx::query("DELETE FROM sessions WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Acquire the per-session turn lock. Whole chat turns run under this
    /// guard so concurrent requests against one session cannot interleave
    /// their appends.
    pub async fn turn_lock(&self, session_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredMessage> {
    let role: String = row.get("role");
    let metadata: Option<String> = row.get("metadata");

    Ok(StoredMessage {
        role: Role::parse(&role)?,
        content: row.get("content"),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get("created_at"),
    })
}
