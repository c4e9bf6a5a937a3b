//! Modes: named persona profiles.
//!
//! A mode supplies the system prompt injected at the head of every
//! completion request and the dialect its replies are rendered in.

use crate::error::ModeCatalogError;
use crate::format::RenderDialect;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fallback mode used when a conversation has never chosen one.
pub const DEFAULT_MODE: &str = "assistant";

/// A persona profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDescriptor {
    pub id: String,
    /// Display name.
    pub name: String,
    /// Sent on start and when the mode is selected.
    #[serde(default)]
    pub welcome: String,
    /// Injected as the first message of every request. Empty means none.
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub dialect: RenderDialect,
}

impl ModeDescriptor {
    /// A mode with no welcome, no system prompt and the default dialect.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            welcome: String::new(),
            system_prompt: String::new(),
            dialect: RenderDialect::default(),
        }
    }

    #[must_use]
    pub fn with_welcome(mut self, welcome: impl Into<String>) -> Self {
        self.welcome = welcome.into();
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_dialect(mut self, dialect: RenderDialect) -> Self {
        self.dialect = dialect;
        self
    }
}

/// The set of configured modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeCatalog {
    #[serde(default = "default_mode_id")]
    pub default_mode: String,
    #[serde(default = "builtin_modes")]
    pub modes: Vec<ModeDescriptor>,
}

fn default_mode_id() -> String {
    DEFAULT_MODE.to_string()
}

fn builtin_modes() -> Vec<ModeDescriptor> {
    vec![
        ModeDescriptor::new("assistant", "Assistant")
            .with_welcome("👋 Welcome! I am your assistant bot. You can use the following commands:")
            .with_system_prompt("You are a helpful assistant.")
            .with_dialect(RenderDialect::Html),
        ModeDescriptor::new("concise", "Concise")
            .with_welcome("✂️ Concise mode. Answers will be short and to the point.")
            .with_system_prompt("You answer in as few words as possible.")
            .with_dialect(RenderDialect::MarkdownV2),
    ]
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self {
            default_mode: default_mode_id(),
            modes: builtin_modes(),
        }
    }
}

impl ModeCatalog {
    /// Creates a catalog. Call [`validate`](Self::validate) before use.
    #[must_use]
    pub fn new(default_mode: impl Into<String>, modes: Vec<ModeDescriptor>) -> Self {
        Self {
            default_mode: default_mode.into(),
            modes,
        }
    }

    /// Checks the catalog's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ModeCatalogError> {
        if self.modes.is_empty() {
            return Err(ModeCatalogError::EmptyCatalog);
        }
        let mut seen = HashSet::new();
        for mode in &self.modes {
            if !seen.insert(mode.id.as_str()) {
                return Err(ModeCatalogError::DuplicateMode {
                    mode: mode.id.clone(),
                });
            }
        }
        if self.get(&self.default_mode).is_none() {
            return Err(ModeCatalogError::UnknownDefault {
                mode: self.default_mode.clone(),
            });
        }
        Ok(())
    }

    /// Looks up a mode by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModeDescriptor> {
        self.modes.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn default_mode(&self) -> &str {
        &self.default_mode
    }

    /// Resolves a mode id, falling back to the default mode and then to
    /// the first listed mode.
    ///
    /// A stored mode can go missing when configuration changes; the
    /// fallback keeps such conversations working. `None` only for an
    /// empty catalog.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&ModeDescriptor> {
        self.get(id)
            .or_else(|| self.get(&self.default_mode))
            .or_else(|| self.modes.first())
    }
}
