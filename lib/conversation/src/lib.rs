//! Conversation engine for parley.
//!
//! This crate provides:
//!
//! - **Conversation State Store**: per-key model, mode and target, with
//!   injected storage for state, history and chat names
//! - **Reply Formatter**: rendering model output for a markup dialect
//! - **Completion Dispatcher**: one inbound text to one rendered reply
//! - **Command Router**: button/command parsing and the chat-naming flow

pub mod dispatch;
pub mod error;
pub mod format;
pub mod history;
pub mod mode;
pub mod router;
pub mod state;

pub use dispatch::{Completion, DispatchError, Dispatcher};
pub use error::{ModeCatalogError, StateError, StorageError};
pub use format::{RenderDialect, format};
pub use history::{
    ChatDirectory, ChatHistoryEntry, HistoryStore, InMemoryChatDirectory, InMemoryHistoryStore,
    NamedChat,
};
pub use mode::{ModeCatalog, ModeDescriptor};
pub use router::{Command, Inbound, Keyboard, Reply, ReplyMarkup, Router, RouterState};
pub use state::{ConversationState, ConversationStore, InMemoryStateStorage, StateStorage};
