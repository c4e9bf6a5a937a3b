//! Telegram Bot API client.
//!
//! Covers the calls the relay needs: `getUpdates`, `sendMessage`,
//! `setWebhook` and `deleteWebhook`. The bot token is part of every
//! request URL, so transport errors are stripped of their URL before
//! they are reported.

use crate::error::GatewayError;
use parley_conversation::{Inbound, Reply, ReplyMarkup};
use parley_core::ConversationKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, instrument};

/// Slack added to the HTTP timeout of a long poll.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// One incoming update.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Update {
    /// The routable part of the update. Updates without text yield `None`.
    #[must_use]
    pub fn into_inbound(self) -> Option<Inbound> {
        let message = self.message?;
        let text = message.text?;
        Some(Inbound {
            chat_id: ConversationKey::new(message.chat.id),
            text,
            reply_to_text: message.reply_to_message.and_then(|parent| parent.text),
        })
    }
}

/// The API's response envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Body of `sendMessage`.
#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<JsonValue>,
}

impl<'a> SendMessage<'a> {
    fn new(chat_id: ConversationKey, reply: &'a Reply) -> Self {
        Self {
            chat_id: chat_id.get(),
            text: &reply.text,
            parse_mode: reply.dialect.map(|d| d.parse_mode()),
            reply_markup: reply.markup.as_ref().map(markup_json),
        }
    }
}

fn markup_json(markup: &ReplyMarkup) -> JsonValue {
    match markup {
        ReplyMarkup::Keyboard(keyboard) => {
            let rows: Vec<Vec<JsonValue>> = keyboard
                .rows
                .iter()
                .map(|row| row.iter().map(|label| json!({ "text": label })).collect())
                .collect();
            json!({ "keyboard": rows, "resize_keyboard": true })
        }
        ReplyMarkup::ForceReply => json!({ "force_reply": true }),
    }
}

/// Client for the Bot API.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    /// `<api_base>/bot<token>`. Never logged.
    base: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Creates a client for the bot identified by `token`.
    #[must_use]
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        }
    }

    /// Long-polls for updates after `offset`.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the call fails or is rejected.
    #[instrument(skip(self))]
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, GatewayError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self
            .call("getUpdates", &body, Some(timeout + POLL_GRACE))
            .await?;
        if !updates.is_empty() {
            debug!(count = updates.len(), "received updates");
        }
        Ok(updates)
    }

    /// Sends a reply to a chat.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the call fails or is rejected.
    #[instrument(skip(self, reply), fields(chat_id = %chat_id))]
    pub async fn send_message(
        &self,
        chat_id: ConversationKey,
        reply: &Reply,
    ) -> Result<(), GatewayError> {
        let _: JsonValue = self
            .call("sendMessage", &SendMessage::new(chat_id, reply), None)
            .await?;
        Ok(())
    }

    /// Registers `url` for webhook delivery.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the call fails or is rejected.
    #[instrument(skip(self, secret))]
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), GatewayError> {
        let mut body = json!({ "url": url, "allowed_updates": ["message"] });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", &body, None).await?;
        Ok(())
    }

    /// Removes any webhook so `getUpdates` can be used.
    ///
    /// # Errors
    ///
    /// Returns a gateway error if the call fails or is rejected.
    #[instrument(skip(self))]
    pub async fn delete_webhook(&self) -> Result<(), GatewayError> {
        let _: bool = self.call("deleteWebhook", &json!({}), None).await?;
        Ok(())
    }

    async fn call<B, T>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(format!("{}/{method}", self.base)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| GatewayError::Transport {
            reason: e.without_url().to_string(),
        })?;
        let envelope: Envelope<T> = response.json().await.map_err(|e| GatewayError::Decode {
            reason: e.without_url().to_string(),
        })?;
        decode_envelope(envelope)
    }
}

fn decode_envelope<T>(envelope: Envelope<T>) -> Result<T, GatewayError> {
    if !envelope.ok {
        return Err(GatewayError::Api {
            description: envelope
                .description
                .unwrap_or_else(|| "no description".to_string()),
        });
    }
    envelope.result.ok_or_else(|| GatewayError::Decode {
        reason: "ok response without result".to_string(),
    })
}
