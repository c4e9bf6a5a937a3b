//! Completion primitives for parley.
//!
//! This crate provides:
//!
//! - **Model Catalog**: the configured set of models and their token rules
//! - **Token Accountant**: per-family token estimates for requests and answers
//! - **Completion Backend**: the wire types and the seam the dispatcher calls
//! - **OpenAI Backend**: an HTTP implementation of that seam

pub mod backend;
pub mod catalog;
pub mod error;
pub mod openai;
pub mod tokens;

pub use backend::{
    ApiError, ChatMessage, Choice, ChoiceMessage, CompletionBackend, CompletionRequest,
    CompletionResponse, MessageRole,
};
pub use catalog::{ModelCatalog, ModelDescriptor, TokenRules};
pub use error::{CatalogError, LlmError, TokenError};
pub use openai::OpenAiBackend;
pub use tokens::{CharEstimator, TokenAccountant, TokenEstimator, TokenUsage};
