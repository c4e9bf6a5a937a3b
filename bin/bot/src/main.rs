//! parley: relays chat messages between Telegram users and an
//! OpenAI-compatible completion backend.

mod config;
mod db;
mod error;
mod gateway;
mod telegram;
mod webhook;

use crate::config::BotConfig;
use crate::error::BotError;
use crate::gateway::Gateway;
use crate::telegram::TelegramClient;
use parley_ai::{ModelCatalog, OpenAiBackend, TokenAccountant};
use parley_conversation::{ConversationStore, Dispatcher, ModeCatalog, Router};
use parley_core::Result;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parley=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!(error = %report, "parley stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BotError> {
    let config = BotConfig::load().map_err(|e| BotError::Config {
        details: e.to_string(),
    })?;
    config
        .validate()
        .map_err(|details| BotError::Catalog { details })?;
    tracing::info!(
        models = config.catalog.models.len(),
        modes = config.modes.modes.len(),
        persistent = config.database_url.is_some(),
        webhook = config.telegram.webhook().is_some(),
        "Loaded configuration"
    );

    let BotConfig {
        telegram,
        backend,
        database_url,
        history,
        catalog,
        modes,
    } = config;
    let models = Arc::new(catalog);
    let store = Arc::new(
        open_store(database_url.as_deref(), Arc::clone(&models), Arc::new(modes)).await?,
    );

    let backend_timeout = backend.timeout();
    let completion =
        OpenAiBackend::new(&backend.base_url, backend.api_key, backend_timeout).map_err(|e| {
            BotError::Config {
                details: e.to_string(),
            }
        })?;
    let dispatcher = Arc::new(
        Dispatcher::new(
            Arc::clone(&store),
            Arc::new(completion),
            TokenAccountant::new(models),
        )
        .with_history(history.enabled),
    );
    let router = Arc::new(Router::new(store, dispatcher));
    let gateway = Gateway::new(
        router,
        TelegramClient::new(&telegram.api_base, &telegram.token),
    );

    match telegram.webhook() {
        Some(url) => webhook::serve(gateway, url, &telegram).await,
        None => gateway.poll(telegram.poll_timeout()).await,
    }
}

/// Builds the state store, on Postgres when a URL is configured.
async fn open_store(
    database_url: Option<&str>,
    models: Arc<ModelCatalog>,
    modes: Arc<ModeCatalog>,
) -> Result<ConversationStore, BotError> {
    let Some(url) = database_url else {
        tracing::info!("No database configured, keeping state in memory");
        return Ok(ConversationStore::in_memory(models, modes));
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .map_err(|e| BotError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| BotError::Migration {
            details: e.to_string(),
        })?;
    tracing::info!("Database migrations completed");

    Ok(ConversationStore::new(
        Arc::new(db::PgStateStorage::new(pool.clone())),
        Arc::new(db::PgHistoryStore::new(pool.clone())),
        Arc::new(db::PgChatDirectory::new(pool)),
        models,
        modes,
    ))
}
