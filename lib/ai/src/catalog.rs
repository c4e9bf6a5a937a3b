//! The configured model catalog.
//!
//! Loaded once at startup and read-only afterwards. Every model a
//! conversation may be switched to must be listed here, and every listed
//! model's family must have token rules.

use crate::error::CatalogError;
use crate::tokens::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Fallback model used when a conversation has never chosen one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Per-family overheads used by the token accountant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRules {
    /// Tokens added for every message, independent of its content.
    pub tokens_per_message: i64,
    /// Tokens added when a message carries a name. May be negative.
    pub tokens_per_name: i64,
}

impl TokenRules {
    /// Creates a rule set.
    #[must_use]
    pub const fn new(tokens_per_message: i64, tokens_per_name: i64) -> Self {
        Self {
            tokens_per_message,
            tokens_per_name,
        }
    }
}

/// A model that conversations can be switched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier sent to the backend.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// USD per 1000 input tokens.
    #[serde(default)]
    pub input_price: f64,
    /// USD per 1000 output tokens.
    #[serde(default)]
    pub output_price: f64,
    /// Capability scores keyed by capability name.
    #[serde(default)]
    pub scores: BTreeMap<String, u8>,
    /// Tokenization family; selects the [`TokenRules`].
    pub family: String,
}

impl ModelDescriptor {
    /// Creates a descriptor with no prices or scores.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            input_price: 0.0,
            output_price: 0.0,
            scores: BTreeMap::new(),
            family: family.into(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets per-1000-token prices.
    #[must_use]
    pub fn with_prices(mut self, input_price: f64, output_price: f64) -> Self {
        self.input_price = input_price;
        self.output_price = output_price;
        self
    }

    #[must_use]
    pub fn with_score(mut self, capability: impl Into<String>, score: u8) -> Self {
        self.scores.insert(capability.into(), score);
        self
    }

    /// Estimated cost in USD of an exchange with the given usage.
    #[must_use]
    pub fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        f64::from(usage.input_tokens) / 1000.0 * self.input_price
            + f64::from(usage.output_tokens) / 1000.0 * self.output_price
    }
}

/// The set of configured models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default = "default_model_id")]
    pub default_model: String,
    #[serde(default = "builtin_models")]
    pub models: Vec<ModelDescriptor>,
    /// Token rules keyed by model family.
    #[serde(default = "builtin_token_rules")]
    pub token_rules: BTreeMap<String, TokenRules>,
}

fn default_model_id() -> String {
    DEFAULT_MODEL.to_string()
}

fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gpt-3.5-turbo", "GPT-3.5 Turbo", "gpt-3.5-turbo")
            .with_description("Fast and inexpensive general-purpose model")
            .with_prices(0.0015, 0.002)
            .with_score("power", 3)
            .with_score("speed", 5),
        ModelDescriptor::new("gpt-4", "GPT-4", "gpt-4")
            .with_description("Slower, more capable reasoning model")
            .with_prices(0.03, 0.06)
            .with_score("power", 5)
            .with_score("speed", 2),
    ]
}

fn builtin_token_rules() -> BTreeMap<String, TokenRules> {
    BTreeMap::from([
        ("gpt-3.5-turbo".to_string(), TokenRules::new(3, 1)),
        ("gpt-3.5-turbo-0301".to_string(), TokenRules::new(4, -1)),
        ("gpt-4".to_string(), TokenRules::new(3, 1)),
    ])
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            default_model: default_model_id(),
            models: builtin_models(),
            token_rules: builtin_token_rules(),
        }
    }
}

impl ModelCatalog {
    /// Creates a catalog from explicit parts.
    #[must_use]
    pub fn new(
        default_model: impl Into<String>,
        models: Vec<ModelDescriptor>,
        token_rules: BTreeMap<String, TokenRules>,
    ) -> Self {
        Self {
            default_model: default_model.into(),
            models,
            token_rules,
        }
    }

    /// Checks the catalog's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.models.is_empty() {
            return Err(CatalogError::EmptyCatalog);
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(CatalogError::DuplicateModel {
                    model: model.id.clone(),
                });
            }
            if !self.token_rules.contains_key(&model.family) {
                return Err(CatalogError::MissingTokenRules {
                    model: model.id.clone(),
                    family: model.family.clone(),
                });
            }
        }

        if !self.contains(&self.default_model) {
            return Err(CatalogError::UnknownDefault {
                model: self.default_model.clone(),
            });
        }

        Ok(())
    }

    /// Looks up a model by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Configured model ids, in catalog order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.id.as_str())
    }

    /// Token rules for the family of the given model.
    #[must_use]
    pub fn rules_for(&self, model_id: &str) -> Option<TokenRules> {
        let model = self.get(model_id)?;
        self.token_rules.get(&model.family).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = ModelCatalog::default();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.default_model(), "gpt-3.5-turbo");
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["gpt-3.5-turbo", "gpt-4"]);
    }

    #[test]
    fn rules_follow_family() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.rules_for("gpt-4"), Some(TokenRules::new(3, 1)));
        assert_eq!(catalog.rules_for("not-a-model"), None);
    }

    #[test]
    fn validate_rejects_missing_rules() {
        let catalog = ModelCatalog::new(
            "local",
            vec![ModelDescriptor::new("local", "Local", "llama")],
            BTreeMap::new(),
        );
        assert_eq!(
            catalog.validate(),
            Err(CatalogError::MissingTokenRules {
                model: "local".to_string(),
                family: "llama".to_string()
            })
        );
    }

    #[test]
    fn validate_rejects_unknown_default() {
        let mut catalog = ModelCatalog::default();
        catalog.default_model = "gpt-5".to_string();
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::UnknownDefault { .. })
        ));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let mut catalog = ModelCatalog::default();
        catalog
            .models
            .push(ModelDescriptor::new("gpt-4", "GPT-4 again", "gpt-4"));
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::DuplicateModel { .. })
        ));
    }

    #[test]
    fn cost_uses_per_thousand_prices() {
        let model = ModelDescriptor::new("m", "M", "f").with_prices(1.0, 2.0);
        let usage = TokenUsage {
            input_tokens: 500,
            output_tokens: 250,
        };
        let cost = model.estimate_cost(&usage);
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn partial_config_falls_back_to_builtins() {
        let catalog: ModelCatalog =
            serde_json::from_str(r#"{"default_model": "gpt-4"}"#).expect("deserialize");
        assert_eq!(catalog.default_model(), "gpt-4");
        assert_eq!(catalog.models.len(), 2);
        assert!(catalog.validate().is_ok());
    }
}
