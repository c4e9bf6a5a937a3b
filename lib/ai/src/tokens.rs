//! Token accounting.
//!
//! Estimates how many context tokens a request and its answer consume,
//! following the per-family message and name overheads in the model
//! catalog. The numbers feed logging and cost estimates only; nothing
//! here blocks or truncates a request.

use crate::backend::ChatMessage;
use crate::catalog::ModelCatalog;
use crate::error::TokenError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tokens the backend appends to prime the assistant's reply.
const REPLY_PRIMING_TOKENS: i64 = 2;

/// Token for the assistant role that precedes every answer.
const ANSWER_ROLE_TOKENS: i64 = 1;

/// Estimates the token length of a piece of text.
pub trait TokenEstimator: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;
}

/// Character-ratio estimator.
///
/// Roughly four characters per token for English text, which is close
/// enough to a BPE tokenizer for budgeting.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimator {
    chars_per_token: f64,
}

impl CharEstimator {
    /// Creates an estimator with the given characters-per-token ratio.
    #[must_use]
    pub fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl TokenEstimator for CharEstimator {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as f64;
        (chars / self.chars_per_token).ceil() as usize
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Computes token estimates from the catalog's per-family rules.
#[derive(Clone)]
pub struct TokenAccountant {
    catalog: Arc<ModelCatalog>,
    estimator: Arc<dyn TokenEstimator>,
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAccountant")
            .field("models", &self.catalog.models.len())
            .finish_non_exhaustive()
    }
}

impl TokenAccountant {
    /// Creates an accountant using the default character estimator.
    #[must_use]
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self::with_estimator(catalog, Arc::new(CharEstimator::default()))
    }

    /// Creates an accountant with a specific estimator.
    #[must_use]
    pub fn with_estimator(catalog: Arc<ModelCatalog>, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { catalog, estimator }
    }

    /// Estimates the input tokens of a request.
    ///
    /// Each message costs the family's per-message overhead plus its
    /// content, and a named message additionally costs the per-name
    /// overhead plus the name. Two priming tokens are added once.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModelFamily` if the model or its family has no rules.
    pub fn count_input(&self, messages: &[ChatMessage], model: &str) -> Result<u32, TokenError> {
        let rules = self.rules(model)?;

        let mut total = REPLY_PRIMING_TOKENS;
        for message in messages {
            total += rules.tokens_per_message + self.len(&message.content);
            if let Some(name) = &message.name {
                total += rules.tokens_per_name + self.len(name);
            }
        }

        Ok(clamp(total))
    }

    /// Estimates the output tokens of an answer.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModelFamily` if the model or its family has no rules.
    pub fn count_output(&self, answer: &str, model: &str) -> Result<u32, TokenError> {
        self.rules(model)?;
        Ok(clamp(ANSWER_ROLE_TOKENS + self.len(answer)))
    }

    /// Estimates both sides of an exchange.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModelFamily` if the model or its family has no rules.
    pub fn count_tokens(
        &self,
        messages: &[ChatMessage],
        answer: &str,
        model: &str,
    ) -> Result<TokenUsage, TokenError> {
        Ok(TokenUsage {
            input_tokens: self.count_input(messages, model)?,
            output_tokens: self.count_output(answer, model)?,
        })
    }

    fn rules(&self, model: &str) -> Result<crate::catalog::TokenRules, TokenError> {
        self.catalog
            .rules_for(model)
            .ok_or_else(|| TokenError::UnknownModelFamily {
                model: model.to_string(),
            })
    }

    fn len(&self, text: &str) -> i64 {
        i64::try_from(self.estimator.count(text)).unwrap_or(i64::MAX)
    }
}

fn clamp(total: i64) -> u32 {
    u32::try_from(total.max(0)).unwrap_or(u32::MAX)
}
