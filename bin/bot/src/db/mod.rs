//! Postgres storage for conversation state, history and chat names.
//!
//! Each repository implements one storage trait from
//! `parley-conversation`; sqlx errors are flattened into `StorageError`.

pub mod chats;
pub mod history;
pub mod state;

pub use chats::PgChatDirectory;
pub use history::PgHistoryStore;
pub use state::PgStateStorage;

use parley_conversation::StorageError;

fn storage_error(err: sqlx::Error) -> StorageError {
    StorageError::Backend {
        reason: err.to_string(),
    }
}
