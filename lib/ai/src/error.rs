//! Error types for the AI crate.
//!
//! - `LlmError`: completion backend outcomes other than a usable answer
//! - `TokenError`: token accounting lookups
//! - `CatalogError`: model catalog validation

use std::fmt;

/// Errors from completion backend operations.
///
/// Every variant is terminal for the request that produced it. Nothing
/// in this crate retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The request could not be sent or the connection failed.
    Transport { reason: String },
    /// The request did not complete before the client timeout.
    Timeout,
    /// The backend answered with a body that is not a completion response.
    MalformedResponse { reason: String },
    /// HTTP 429: the account's quota is exhausted.
    QuotaExceeded,
    /// The backend reported a structured error.
    Structured {
        message: String,
        kind: Option<String>,
        param: Option<String>,
        code: Option<String>,
    },
    /// The backend returned no choices and no error.
    EmptyResponse,
    /// The backend client could not be constructed.
    InvalidConfig { reason: String },
}

impl LlmError {
    /// Returns true for failures that happened before a response was parsed.
    ///
    /// Transport failures and malformed bodies are not distinguished in
    /// what the user sees.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout
                | Self::MalformedResponse { .. }
                | Self::InvalidConfig { .. }
        )
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { reason } => write!(f, "completion request failed: {reason}"),
            Self::Timeout => write!(f, "completion request timed out"),
            Self::MalformedResponse { reason } => {
                write!(f, "failed to parse completion response: {reason}")
            }
            Self::QuotaExceeded => write!(f, "completion quota exceeded"),
            Self::Structured {
                message,
                kind,
                code,
                ..
            } => {
                write!(f, "backend error: {message}")?;
                if let Some(kind) = kind {
                    write!(f, " (type {kind})")?;
                }
                if let Some(code) = code {
                    write!(f, " (code {code})")?;
                }
                Ok(())
            }
            Self::EmptyResponse => write!(f, "completion response contained no choices"),
            Self::InvalidConfig { reason } => {
                write!(f, "invalid backend configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors from token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The model is unknown or its family has no token rules.
    UnknownModelFamily { model: String },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModelFamily { model } => {
                write!(f, "no token rules for the family of model '{model}'")
            }
        }
    }
}

impl std::error::Error for TokenError {}

/// Errors from model catalog validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog lists no models.
    EmptyCatalog,
    /// The default model is not in the catalog.
    UnknownDefault { model: String },
    /// Two descriptors share an id.
    DuplicateModel { model: String },
    /// A model's family has no token rules.
    MissingTokenRules { model: String, family: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCatalog => write!(f, "model catalog is empty"),
            Self::UnknownDefault { model } => {
                write!(f, "default model '{model}' is not in the catalog")
            }
            Self::DuplicateModel { model } => {
                write!(f, "model '{model}' is listed more than once")
            }
            Self::MissingTokenRules { model, family } => {
                write!(f, "model '{model}' uses family '{family}' which has no token rules")
            }
        }
    }
}

impl std::error::Error for CatalogError {}
