//! Error types for the bot process.
//!
//! `BotError` is the context carried by startup reports. `GatewayError`
//! is returned by the messaging platform client.

use std::fmt;

/// Startup and run-loop failures.
#[derive(Debug)]
pub enum BotError {
    /// Configuration could not be loaded or is inconsistent.
    Config { details: String },
    /// The database could not be reached.
    Database { details: String },
    /// Embedded migrations failed.
    Migration { details: String },
    /// The messaging platform rejected a setup call or the listener failed.
    Gateway { details: String },
    /// The model or mode catalog failed validation.
    Catalog { details: String },
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {details}"),
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::Migration { details } => write!(f, "migration failed: {details}"),
            Self::Gateway { details } => write!(f, "gateway error: {details}"),
            Self::Catalog { details } => write!(f, "invalid catalog: {details}"),
        }
    }
}

impl std::error::Error for BotError {}

/// Errors from the messaging platform API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The HTTP call failed.
    Transport { reason: String },
    /// The platform answered `ok: false`.
    Api { description: String },
    /// The body could not be decoded.
    Decode { reason: String },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { reason } => write!(f, "request failed: {reason}"),
            Self::Api { description } => write!(f, "platform error: {description}"),
            Self::Decode { reason } => write!(f, "undecodable response: {reason}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for BotError {
    fn from(err: GatewayError) -> Self {
        Self::Gateway {
            details: err.to_string(),
        }
    }
}
