//! Conversation state table.

use super::storage_error;
use async_trait::async_trait;
use parley_conversation::{ConversationState, StateStorage, StorageError};
use parley_core::ConversationKey;
use sqlx::{FromRow, PgPool};

/// Row type for `conversation_state`.
#[derive(FromRow)]
struct StateRow {
    model: String,
    mode: String,
    target: Option<i64>,
}

impl From<StateRow> for ConversationState {
    fn from(row: StateRow) -> Self {
        Self {
            active_model: row.model,
            active_mode: row.mode,
            active_target: row.target.map(ConversationKey::new),
        }
    }
}

/// Repository for per-key conversation state.
#[derive(Debug, Clone)]
pub struct PgStateStorage {
    pool: PgPool,
}

impl PgStateStorage {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStorage for PgStateStorage {
    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationState>, StorageError> {
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            SELECT model, mode, target
            FROM conversation_state
            WHERE chat_id = $1
            "#,
        )
        .bind(key.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(ConversationState::from))
    }

    async fn save(
        &self,
        key: ConversationKey,
        state: &ConversationState,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_state (chat_id, model, mode, target)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chat_id) DO UPDATE
            SET model = EXCLUDED.model, mode = EXCLUDED.mode, target = EXCLUDED.target
            "#,
        )
        .bind(key.get())
        .bind(&state.active_model)
        .bind(&state.active_mode)
        .bind(state.active_target.map(|t| t.get()))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM conversation_state
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
