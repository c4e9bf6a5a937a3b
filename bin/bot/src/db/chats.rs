//! Chat names table.

use super::storage_error;
use async_trait::async_trait;
use parley_conversation::{ChatDirectory, NamedChat, StorageError};
use parley_core::ConversationKey;
use sqlx::{FromRow, PgPool};

/// Row type for `chat_names`.
#[derive(FromRow)]
struct ChatNameRow {
    chat_id: i64,
    chat_name: String,
}

/// Repository for named chats.
///
/// Names are not owned by any user: every user sees every named chat.
#[derive(Debug, Clone)]
pub struct PgChatDirectory {
    pool: PgPool,
}

impl PgChatDirectory {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatDirectory for PgChatDirectory {
    async fn create(&self, key: ConversationKey, name: &str) -> Result<NamedChat, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO chat_names (chat_id, chat_name)
            VALUES ($1, $2)
            "#,
        )
        .bind(key.get())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(NamedChat {
            key,
            name: name.to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<NamedChat>, StorageError> {
        let rows: Vec<ChatNameRow> = sqlx::query_as(
            r#"
            SELECT chat_id, chat_name
            FROM chat_names
            ORDER BY chat_id ASC, chat_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|row| NamedChat {
                key: ConversationKey::new(row.chat_id),
                name: row.chat_name,
            })
            .collect())
    }

    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM chat_names
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
