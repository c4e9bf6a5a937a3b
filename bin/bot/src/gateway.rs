//! The inbound-update loop.
//!
//! Each update is routed to completion and its reply sent before the
//! next update is taken from the poll batch.

use crate::error::BotError;
use crate::telegram::{TelegramClient, Update};
use parley_conversation::Router;
use parley_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed `getUpdates` before polling again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connects the command router to the messaging platform.
#[derive(Debug, Clone)]
pub struct Gateway {
    router: Arc<Router>,
    client: TelegramClient,
}

impl Gateway {
    #[must_use]
    pub fn new(router: Arc<Router>, client: TelegramClient) -> Self {
        Self { router, client }
    }

    #[must_use]
    pub fn client(&self) -> &TelegramClient {
        &self.client
    }

    /// Routes one update and sends the reply, if any.
    pub async fn process(&self, update: Update) {
        let update_id = update.update_id;
        let Some(inbound) = update.into_inbound() else {
            debug!(update_id, "ignoring update without text");
            return;
        };

        let chat_id = inbound.chat_id;
        let Some(reply) = self.router.handle(inbound).await else {
            return;
        };
        if let Err(e) = self.client.send_message(chat_id, &reply).await {
            error!(chat_id = %chat_id, error = %e, "failed to send reply");
        }
    }

    /// Long-polls until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns `Gateway` if a previously registered webhook cannot be removed.
    pub async fn poll(&self, timeout: Duration) -> Result<(), BotError> {
        self.client.delete_webhook().await.map_err(BotError::from)?;
        info!(timeout_secs = timeout.as_secs(), "polling for updates");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        let mut offset = 0;
        loop {
            let batch = tokio::select! {
                () = &mut shutdown => break,
                batch = self.client.get_updates(offset, timeout) => batch,
            };
            match batch {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.process(update).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        info!("polling stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C, shutting down"),
        Err(e) => {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use parley_ai::{
        CompletionBackend, CompletionRequest, CompletionResponse, LlmError, ModelCatalog,
        TokenAccountant,
    };
    use parley_conversation::{ConversationStore, Dispatcher, ModeCatalog};
    use std::result::Result;

    /// Always answers "pong".
    struct PongBackend;

    #[async_trait]
    impl CompletionBackend for PongBackend {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse::with_content("pong"))
        }
    }

    /// A gateway over in-memory state that talks to `api_base`.
    pub(crate) fn gateway(api_base: &str) -> Gateway {
        let models = Arc::new(ModelCatalog::default());
        let store = Arc::new(ConversationStore::in_memory(
            Arc::clone(&models),
            Arc::new(ModeCatalog::default()),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::new(PongBackend),
            TokenAccountant::new(models),
        ));
        Gateway::new(
            Arc::new(Router::new(store, dispatcher)),
            TelegramClient::new(api_base, "TOKEN"),
        )
    }
}
