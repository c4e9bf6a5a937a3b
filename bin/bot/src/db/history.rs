//! Chat history table.

use super::storage_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_conversation::{ChatHistoryEntry, HistoryStore, StorageError};
use parley_core::ConversationKey;
use sqlx::{FromRow, PgPool};

/// Row type for `chat_history`.
#[derive(FromRow)]
struct HistoryRow {
    chat_id: i64,
    message: String,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for ChatHistoryEntry {
    fn from(row: HistoryRow) -> Self {
        Self {
            key: ConversationKey::new(row.chat_id),
            message: row.message,
            timestamp: row.created_at,
        }
    }
}

/// Repository for recorded user messages.
#[derive(Debug, Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, entry: ChatHistoryEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO chat_history (chat_id, message, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(entry.key.get())
        .bind(&entry.message)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn list(&self, key: ConversationKey) -> Result<Vec<ChatHistoryEntry>, StorageError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT chat_id, message, created_at
            FROM chat_history
            WHERE chat_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(key.get())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(ChatHistoryEntry::from).collect())
    }

    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM chat_history
            WHERE chat_id = $1
            "#,
        )
        .bind(key.get())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}
