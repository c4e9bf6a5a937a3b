//! Bot configuration.
//!
//! Loaded once at startup via the `config` crate from an optional TOML
//! file followed by `PARLEY_*` environment variables, using `__` to
//! separate nested keys (for example `PARLEY_TELEGRAM__TOKEN`).

use parley_ai::ModelCatalog;
use parley_conversation::ModeCatalog;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "PARLEY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "parley.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct BotConfig {
    pub telegram: TelegramConfig,
    pub backend: BackendConfig,

    /// PostgreSQL connection URL. Without it state lives in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub catalog: ModelCatalog,

    #[serde(default)]
    pub modes: ModeCatalog,
}

/// Messaging platform settings.
#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll wait, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Public URL registered with `setWebhook`.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Shared secret the platform echoes on every webhook request.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub use_webhook: bool,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[redacted]")
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("webhook_url", &self.webhook_url)
            .field("listen_addr", &self.listen_addr)
            .field("use_webhook", &self.use_webhook)
            .finish_non_exhaustive()
    }
}

impl TelegramConfig {
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// The webhook URL, when webhook delivery is enabled and configured.
    #[must_use]
    pub fn webhook(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .filter(|url| self.use_webhook && !url.is_empty())
    }
}

/// Completion backend settings.
#[derive(Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL; `/v1/chat/completions` is appended.
    pub base_url: String,
    pub api_key: String,

    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_timeout_secs() -> u64 {
    120
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[redacted]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// History recording settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
}

fn default_history_enabled() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
        }
    }
}

impl BotConfig {
    /// Loads configuration from the file named by `PARLEY_CONFIG` (if it
    /// exists) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name(&path).required(false))
                .add_source(
                    config::Environment::with_prefix("PARLEY")
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder.build()?.try_deserialize()
    }

    /// Checks both catalogs and the webhook settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.catalog.validate().map_err(|e| e.to_string())?;
        self.modes.validate().map_err(|e| e.to_string())?;
        if self.telegram.use_webhook && self.telegram.webhook().is_none() {
            return Err("telegram.use_webhook is set but telegram.webhook_url is empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_conversation::RenderDialect;

    fn from_toml(text: &str) -> Result<BotConfig, config::ConfigError> {
        BotConfig::from_builder(
            config::Config::builder()
                .add_source(config::File::from_str(text, config::FileFormat::Toml)),
        )
    }

    const MINIMAL: &str = r#"
        [telegram]
        token = "123:abc"

        [backend]
        base_url = "http://localhost:8000"
        api_key = "sk-test"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = from_toml(MINIMAL).expect("load");
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.telegram.poll_timeout(), Duration::from_secs(60));
        assert_eq!(config.telegram.listen_addr, "0.0.0.0:8080");
        assert!(!config.telegram.use_webhook);
        assert_eq!(config.backend.timeout(), Duration::from_secs(120));
        assert!(config.database_url.is_none());
        assert!(config.history.enabled);
        assert_eq!(config.catalog.default_model(), "gpt-3.5-turbo");
        assert_eq!(config.modes.default_mode(), "assistant");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_token_is_an_error() {
        let result = from_toml(
            r#"
            [backend]
            base_url = "http://localhost:8000"
            api_key = "sk-test"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn catalogs_can_be_replaced() {
        let config = from_toml(&format!(
            r#"{MINIMAL}
            [catalog]
            default_model = "local-llama"

            [[catalog.models]]
            id = "local-llama"
            name = "Llama"
            family = "llama"
            input_price = 0.0
            output_price = 0.0

            [catalog.token_rules.llama]
            tokens_per_message = 3
            tokens_per_name = 1

            [modes]
            default_mode = "terse"

            [[modes.modes]]
            id = "terse"
            name = "Terse"
            system_prompt = "Be brief."
            dialect = "markdown_v2"
            "#
        ))
        .expect("load");

        assert!(config.validate().is_ok());
        assert!(config.catalog.contains("local-llama"));
        assert!(!config.catalog.contains("gpt-4"));
        assert_eq!(
            config.modes.resolve("terse").map(|m| m.dialect),
            Some(RenderDialect::MarkdownV2)
        );
    }

    #[test]
    fn model_without_token_rules_fails_validation() {
        let config = from_toml(&format!(
            r#"{MINIMAL}
            [catalog]
            default_model = "mystery"
            token_rules = {{}}

            [[catalog.models]]
            id = "mystery"
            name = "Mystery"
            family = "unknown"
            "#
        ))
        .expect("load");
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_requires_url() {
        let mut config = from_toml(MINIMAL).expect("load");
        config.telegram.use_webhook = true;
        assert!(config.validate().is_err());

        config.telegram.webhook_url = Some("https://bot.example.com/".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.telegram.webhook(), Some("https://bot.example.com/"));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = from_toml(MINIMAL).expect("load");
        let debug = format!("{config:?}");
        assert!(!debug.contains("123:abc"));
        assert!(!debug.contains("sk-test"));
    }
}
