//! Error types for the conversation crate.
//!
//! - `StorageError`: failures reported by injected storage
//! - `StateError`: rejected or failed state mutations
//! - `ModeCatalogError`: mode catalog validation

use parley_core::ConversationKey;
use std::fmt;

/// Errors reported by storage collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The underlying store failed.
    Backend { reason: String },
    /// A stored row could not be decoded.
    Corrupt { key: ConversationKey, reason: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { reason } => write!(f, "storage failed: {reason}"),
            Self::Corrupt { key, reason } => {
                write!(f, "stored state for {key} is corrupt: {reason}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors from conversation state operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested model is not in the catalog.
    InvalidModel { model: String },
    /// The requested mode is not in the catalog.
    InvalidMode { mode: String },
    /// A delete found nothing to remove.
    NotFound { key: ConversationKey },
    /// Storage failed while reading or writing state.
    Persistence { reason: String },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidModel { model } => write!(f, "unknown model '{model}'"),
            Self::InvalidMode { mode } => write!(f, "unknown mode '{mode}'"),
            Self::NotFound { key } => write!(f, "conversation {key} not found"),
            Self::Persistence { reason } => write!(f, "persistence error: {reason}"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<StorageError> for StateError {
    fn from(err: StorageError) -> Self {
        Self::Persistence {
            reason: err.to_string(),
        }
    }
}

/// Errors from mode catalog validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeCatalogError {
    /// The catalog lists no modes.
    EmptyCatalog,
    /// The default mode is not in the catalog.
    UnknownDefault { mode: String },
    /// Two descriptors share an id.
    DuplicateMode { mode: String },
}

impl fmt::Display for ModeCatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCatalog => write!(f, "mode catalog is empty"),
            Self::UnknownDefault { mode } => {
                write!(f, "default mode '{mode}' is not in the catalog")
            }
            Self::DuplicateMode { mode } => write!(f, "mode '{mode}' is listed more than once"),
        }
    }
}

impl std::error::Error for ModeCatalogError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_model_display() {
        let err = StateError::InvalidModel {
            model: "not-a-real-model".to_string(),
        };
        assert_eq!(err.to_string(), "unknown model 'not-a-real-model'");
    }

    #[test]
    fn storage_error_becomes_persistence() {
        let err: StateError = StorageError::Backend {
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(matches!(err, StateError::Persistence { ref reason } if reason.contains("connection reset")));
    }

    #[test]
    fn not_found_display() {
        let err = StateError::NotFound {
            key: ConversationKey::new(5),
        };
        assert!(err.to_string().contains("5"));
    }
}
