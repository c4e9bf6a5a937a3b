//! Chat history and named chats.
//!
//! History is append-only and never replayed into completion requests.
//! It is read back only for listing and purged on chat deletion.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::ConversationKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One recorded user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub key: ConversationKey,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatHistoryEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(key: ConversationKey, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A chat the user has given a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedChat {
    pub key: ConversationKey,
    pub name: String,
}

/// Trait for history storage.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends an entry.
    async fn append(&self, entry: ChatHistoryEntry) -> Result<(), StorageError>;

    /// Lists entries for a key, oldest first.
    async fn list(&self, key: ConversationKey) -> Result<Vec<ChatHistoryEntry>, StorageError>;

    /// Deletes every entry for a key, returning how many were removed.
    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError>;
}

/// Trait for the named-chat directory.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// Records a name for a key.
    async fn create(&self, key: ConversationKey, name: &str) -> Result<NamedChat, StorageError>;

    /// Lists every named chat.
    async fn list(&self) -> Result<Vec<NamedChat>, StorageError>;

    /// Deletes the names recorded for a key, returning how many were removed.
    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError>;
}

/// In-memory history store.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<Vec<ChatHistoryEntry>>,
}

impl InMemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ChatHistoryEntry>>, StorageError> {
        self.entries.lock().map_err(|e| StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: ChatHistoryEntry) -> Result<(), StorageError> {
        self.lock()?.push(entry);
        Ok(())
    }

    async fn list(&self, key: ConversationKey) -> Result<Vec<ChatHistoryEntry>, StorageError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|e| e.key == key)
            .cloned()
            .collect())
    }

    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|e| e.key != key);
        Ok((before - entries.len()) as u64)
    }
}

/// In-memory chat directory.
///
/// Chats are listed in key order.
#[derive(Debug, Default)]
pub struct InMemoryChatDirectory {
    names: Mutex<BTreeMap<ConversationKey, Vec<String>>>,
}

impl InMemoryChatDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<ConversationKey, Vec<String>>>, StorageError>
    {
        self.names.lock().map_err(|e| StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ChatDirectory for InMemoryChatDirectory {
    async fn create(&self, key: ConversationKey, name: &str) -> Result<NamedChat, StorageError> {
        self.lock()?.entry(key).or_default().push(name.to_string());
        Ok(NamedChat {
            key,
            name: name.to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<NamedChat>, StorageError> {
        Ok(self
            .lock()?
            .iter()
            .flat_map(|(key, names)| {
                names.iter().map(|name| NamedChat {
                    key: *key,
                    name: name.clone(),
                })
            })
            .collect())
    }

    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError> {
        Ok(self
            .lock()?
            .remove(&key)
            .map_or(0, |names| names.len() as u64))
    }
}
