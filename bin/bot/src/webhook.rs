//! Webhook delivery.
//!
//! Registers the public URL with the platform and serves `POST /`. Each
//! request carries one update; requests may be handled concurrently.

use crate::config::TelegramConfig;
use crate::error::BotError;
use crate::gateway::{Gateway, shutdown_signal};
use crate::telegram::Update;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parley_core::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Header the platform uses to echo the registered secret.
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct WebhookState {
    gateway: Gateway,
    secret: Option<Arc<str>>,
}

/// Builds the webhook router.
pub fn app(gateway: Gateway, secret: Option<&str>) -> Router {
    Router::new()
        .route("/", post(receive))
        .layer(TraceLayer::new_for_http())
        .with_state(WebhookState {
            gateway,
            secret: secret.map(Arc::from),
        })
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if let Some(secret) = &state.secret {
        let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if presented != Some(secret.as_ref()) {
            warn!(update_id = update.update_id, "rejecting webhook call with a bad secret");
            return StatusCode::UNAUTHORIZED;
        }
    }
    state.gateway.process(update).await;
    StatusCode::OK
}

/// Registers the webhook and serves it until Ctrl-C.
///
/// # Errors
///
/// Returns `Gateway` if registration, binding or serving fails.
pub async fn serve(
    gateway: Gateway,
    url: &str,
    telegram: &TelegramConfig,
) -> Result<(), BotError> {
    let secret = telegram.webhook_secret.as_deref();
    gateway
        .client()
        .set_webhook(url, secret)
        .await
        .map_err(BotError::from)?;

    let listener = tokio::net::TcpListener::bind(&telegram.listen_addr)
        .await
        .map_err(|e| BotError::Gateway {
            details: format!("failed to bind {}: {e}", telegram.listen_addr),
        })?;
    info!(addr = %telegram.listen_addr, "listening for webhook updates");

    axum::serve(listener, app(gateway, secret))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BotError::Gateway {
            details: e.to_string(),
        })?;

    info!("webhook server stopped");
    Ok(())
}
