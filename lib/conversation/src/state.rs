//! Conversation state.
//!
//! [`ConversationStore`] owns the contract: lazy default materialization,
//! catalog validation on model and mode changes, and per-key
//! serialization of read-modify-write sequences. Persistence is injected
//! through [`StateStorage`], [`HistoryStore`] and [`ChatDirectory`].

use crate::error::{StateError, StorageError};
use crate::history::{ChatDirectory, ChatHistoryEntry, HistoryStore, NamedChat};
use crate::history::{InMemoryChatDirectory, InMemoryHistoryStore};
use crate::mode::ModeCatalog;
use async_trait::async_trait;
use parley_ai::ModelCatalog;
use parley_core::ConversationKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Per-key conversational preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub active_model: String,
    pub active_mode: String,
    /// Where history is recorded; `None` means the key itself.
    pub active_target: Option<ConversationKey>,
}

impl ConversationState {
    /// Creates a state with the given defaults and no target.
    #[must_use]
    pub fn new(model: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            active_model: model.into(),
            active_mode: mode.into(),
            active_target: None,
        }
    }

    /// The key history for `key` is recorded under.
    #[must_use]
    pub fn resolved_target(&self, key: ConversationKey) -> ConversationKey {
        self.active_target.unwrap_or(key)
    }
}

/// Key-value storage for conversation state.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Loads the state for a key, if any has been saved.
    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationState>, StorageError>;

    /// Saves (inserts or replaces) the state for a key.
    async fn save(&self, key: ConversationKey, state: &ConversationState)
    -> Result<(), StorageError>;

    /// Deletes the state for a key, returning how many rows were removed.
    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError>;
}

/// In-memory state storage.
#[derive(Debug, Default)]
pub struct InMemoryStateStorage {
    states: Mutex<HashMap<ConversationKey, ConversationState>>,
}

impl InMemoryStateStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of materialized states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or_default()
    }

    /// Whether no state has been materialized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ConversationKey, ConversationState>>, StorageError>
    {
        self.states.lock().map_err(|e| StorageError::Backend {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StateStorage for InMemoryStateStorage {
    async fn load(&self, key: ConversationKey) -> Result<Option<ConversationState>, StorageError> {
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn save(
        &self,
        key: ConversationKey,
        state: &ConversationState,
    ) -> Result<(), StorageError> {
        self.lock()?.insert(key, state.clone());
        Ok(())
    }

    async fn delete(&self, key: ConversationKey) -> Result<u64, StorageError> {
        Ok(u64::from(self.lock()?.remove(&key).is_some()))
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Exclusive access to one key.
///
/// On release the key's entry is dropped from the lock map, but only when
/// no other task holds or waits on the same lock.
struct KeyGuard<'a> {
    locks: &'a Mutex<HashMap<ConversationKey, KeyLock>>,
    key: ConversationKey,
    lock: KeyLock,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under the map lock, so two owners
        // here means the map and this guard.
        let idle = Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.lock));
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// The conversation state store.
pub struct ConversationStore {
    states: Arc<dyn StateStorage>,
    history: Arc<dyn HistoryStore>,
    chats: Arc<dyn ChatDirectory>,
    models: Arc<ModelCatalog>,
    modes: Arc<ModeCatalog>,
    key_locks: Mutex<HashMap<ConversationKey, KeyLock>>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("models", &self.models.models.len())
            .field("modes", &self.modes.modes.len())
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    /// Creates a store over the given storage.
    #[must_use]
    pub fn new(
        states: Arc<dyn StateStorage>,
        history: Arc<dyn HistoryStore>,
        chats: Arc<dyn ChatDirectory>,
        models: Arc<ModelCatalog>,
        modes: Arc<ModeCatalog>,
    ) -> Self {
        Self {
            states,
            history,
            chats,
            models,
            modes,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store backed entirely by memory.
    #[must_use]
    pub fn in_memory(models: Arc<ModelCatalog>, modes: Arc<ModeCatalog>) -> Self {
        Self::new(
            Arc::new(InMemoryStateStorage::new()),
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemoryChatDirectory::new()),
            models,
            modes,
        )
    }

    /// The model catalog changes are validated against.
    #[must_use]
    pub fn models(&self) -> &ModelCatalog {
        &self.models
    }

    /// The mode catalog changes are validated against.
    #[must_use]
    pub fn modes(&self) -> &ModeCatalog {
        &self.modes
    }

    /// Returns the state for a key, materializing defaults on first access.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if storage fails. The in-memory storage
    /// never does.
    pub async fn get_state(&self, key: ConversationKey) -> Result<ConversationState, StateError> {
        let _guard = self.lock_key(key).await;
        self.load_or_default(key).await
    }

    /// Switches the key's model.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if the model is not configured; the
    /// previous state is left untouched.
    pub async fn set_model(&self, key: ConversationKey, model: &str) -> Result<(), StateError> {
        if !self.models.contains(model) {
            return Err(StateError::InvalidModel {
                model: model.to_string(),
            });
        }
        self.update(key, |state| state.active_model = model.to_string())
            .await?;
        info!(chat_id = %key, model, "model changed");
        Ok(())
    }

    /// Switches the key's mode.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMode` if the mode is not configured; the previous
    /// state is left untouched.
    pub async fn set_mode(&self, key: ConversationKey, mode: &str) -> Result<(), StateError> {
        if !self.modes.contains(mode) {
            return Err(StateError::InvalidMode {
                mode: mode.to_string(),
            });
        }
        self.update(key, |state| state.active_mode = mode.to_string())
            .await?;
        info!(chat_id = %key, mode, "mode changed");
        Ok(())
    }

    /// Points the key's history at another key. Any key is accepted.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if storage fails.
    pub async fn set_target(
        &self,
        key: ConversationKey,
        target: ConversationKey,
    ) -> Result<(), StateError> {
        self.update(key, |state| state.active_target = Some(target))
            .await?;
        info!(chat_id = %key, target = %target, "target changed");
        Ok(())
    }

    /// Removes a key's state, history and chat names.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if storage removed nothing, or `Persistence`
    /// if storage fails.
    pub async fn delete_conversation(&self, key: ConversationKey) -> Result<(), StateError> {
        let removed = {
            let _guard = self.lock_key(key).await;
            let history = self.history.delete(key).await?;
            let names = self.chats.delete(key).await?;
            let state = self.states.delete(key).await?;
            debug!(chat_id = %key, history, names, state, "conversation rows deleted");
            history + names + state
        };

        if removed == 0 {
            return Err(StateError::NotFound { key });
        }
        info!(chat_id = %key, "conversation deleted");
        Ok(())
    }

    /// Appends a history entry.
    ///
    /// # Errors
    ///
    /// Returns the storage error unchanged; callers decide whether it matters.
    pub async fn record_history(&self, entry: ChatHistoryEntry) -> Result<(), StorageError> {
        self.history.append(entry).await
    }

    /// Lists the history recorded under a key.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if storage fails.
    pub async fn history(&self, key: ConversationKey) -> Result<Vec<ChatHistoryEntry>, StateError> {
        Ok(self.history.list(key).await?)
    }

    /// Names the chat for a key.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if storage fails.
    pub async fn create_chat(
        &self,
        key: ConversationKey,
        name: &str,
    ) -> Result<NamedChat, StateError> {
        let chat = self.chats.create(key, name).await?;
        info!(chat_id = %key, name, "chat created");
        Ok(chat)
    }

    /// Lists every named chat.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if storage fails.
    pub async fn list_chats(&self) -> Result<Vec<NamedChat>, StateError> {
        Ok(self.chats.list().await?)
    }

    async fn update<F>(&self, key: ConversationKey, mutate: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut ConversationState) + Send,
    {
        let _guard = self.lock_key(key).await;
        let mut state = self.load_or_default(key).await?;
        mutate(&mut state);
        self.states.save(key, &state).await?;
        Ok(())
    }

    async fn load_or_default(&self, key: ConversationKey) -> Result<ConversationState, StateError> {
        if let Some(state) = self.states.load(key).await? {
            return Ok(state);
        }
        let state = ConversationState::new(self.models.default_model(), self.modes.default_mode());
        self.states.save(key, &state).await?;
        debug!(chat_id = %key, "conversation state materialized");
        Ok(state)
    }

    async fn lock_key(&self, key: ConversationKey) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        KeyGuard {
            locks: &self.key_locks,
            key,
            lock,
            guard: Some(guard),
        }
    }
}
