//! Core types shared across the parley workspace.
//!
//! This crate provides the conversation key that every other crate
//! addresses state by, a request id for correlating log lines of a
//! single completion, and the workspace-wide `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConversationKey, ParseKeyError, RequestId};
