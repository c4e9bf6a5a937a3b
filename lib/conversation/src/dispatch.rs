//! Completion dispatch.
//!
//! Turns one inbound text into one rendered reply: resolves the
//! conversation's model and mode, builds the request, estimates tokens,
//! makes a single backend call and classifies the outcome. Every failure
//! is terminal for the request and becomes a user-visible message.

use crate::error::StateError;
use crate::format::{RenderDialect, format};
use crate::history::ChatHistoryEntry;
use crate::state::ConversationStore;
use parley_ai::{ChatMessage, CompletionBackend, CompletionRequest, LlmError, TokenAccountant};
use parley_core::{ConversationKey, RequestId};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Sent when the backend reports HTTP 429.
pub const QUOTA_MESSAGE: &str =
    "❌ You exceeded your current quota. Please check your plan and billing details.";
/// Sent when the backend reports a structured error.
pub const ERROR_MESSAGE: &str = "❌ An error occurred while processing your request.";
/// Sent when the backend returns no choices.
pub const EMPTY_MESSAGE: &str = "❌ I couldn't process your request.";
/// Sent when the call fails outright or state cannot be read.
pub const FAILURE_MESSAGE: &str = "An error occurred while processing your request.";

/// Why a dispatch produced no answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The conversation state could not be resolved.
    State(StateError),
    /// The backend call did not yield an answer.
    Backend(LlmError),
}

impl DispatchError {
    /// The message shown to the user for this failure.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Backend(LlmError::QuotaExceeded) => QUOTA_MESSAGE,
            Self::Backend(LlmError::Structured { .. }) => ERROR_MESSAGE,
            Self::Backend(LlmError::EmptyResponse) => EMPTY_MESSAGE,
            Self::Backend(_) | Self::State(_) => FAILURE_MESSAGE,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(e) => write!(f, "state lookup failed: {e}"),
            Self::Backend(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// A rendered reply ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Reply text, already rendered for `dialect`.
    pub text: String,
    /// The markup dialect the text is written in.
    pub dialect: RenderDialect,
}

/// The completion dispatcher.
pub struct Dispatcher {
    store: Arc<ConversationStore>,
    backend: Arc<dyn CompletionBackend>,
    accountant: TokenAccountant,
    history_enabled: bool,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("history_enabled", &self.history_enabled)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher. History recording is on by default.
    #[must_use]
    pub fn new(
        store: Arc<ConversationStore>,
        backend: Arc<dyn CompletionBackend>,
        accountant: TokenAccountant,
    ) -> Self {
        Self {
            store,
            backend,
            accountant,
            history_enabled: true,
        }
    }

    /// Turns history recording on or off.
    #[must_use]
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    /// Answers `user_text` for `key`, always producing a reply.
    #[instrument(skip_all, fields(chat_id = %key, request = %RequestId::new()))]
    pub async fn respond(&self, key: ConversationKey, user_text: &str) -> Completion {
        match self.try_respond(key, user_text).await {
            Ok(completion) => completion,
            Err((err, dialect)) => {
                match &err {
                    DispatchError::Backend(LlmError::QuotaExceeded) => {
                        warn!("backend quota exceeded");
                    }
                    DispatchError::Backend(LlmError::Structured { .. }) => {
                        error!(error = %err, "backend reported an error");
                    }
                    DispatchError::Backend(LlmError::EmptyResponse) => {
                        warn!("backend returned no choices");
                    }
                    _ => error!(error = %err, "completion failed"),
                }
                Completion {
                    text: format(err.user_message(), dialect),
                    dialect,
                }
            }
        }
    }

    /// Answers `user_text` for `key`, exposing the failure kind.
    ///
    /// On failure the error is paired with the dialect its user message
    /// should be rendered in.
    ///
    /// # Errors
    ///
    /// Returns `State` if the conversation cannot be resolved and
    /// `Backend` for any backend outcome other than an answer.
    pub async fn try_respond(
        &self,
        key: ConversationKey,
        user_text: &str,
    ) -> Result<Completion, (DispatchError, RenderDialect)> {
        let modes = self.store.modes();
        let state = match self.store.get_state(key).await {
            Ok(state) => state,
            Err(e) => {
                let dialect = modes
                    .resolve(modes.default_mode())
                    .map_or_else(RenderDialect::default, |m| m.dialect);
                return Err((DispatchError::State(e), dialect));
            }
        };
        let Some(mode) = modes.resolve(&state.active_mode) else {
            let err = StateError::InvalidMode {
                mode: state.active_mode,
            };
            return Err((DispatchError::State(err), RenderDialect::default()));
        };
        let model = state.active_model.as_str();

        let mut messages = Vec::with_capacity(2);
        if !mode.system_prompt.is_empty() {
            messages.push(ChatMessage::system(&mode.system_prompt));
        }
        messages.push(ChatMessage::user(user_text));

        match self.accountant.count_input(&messages, model) {
            Ok(tokens) => debug!(model, mode = %mode.id, input_tokens = tokens, "request estimated"),
            Err(e) => warn!(model, error = %e, "token estimate unavailable"),
        }

        let request = CompletionRequest::new(model, messages);
        let started = Instant::now();
        let content = self
            .backend
            .complete(&request)
            .await
            .and_then(parley_ai::CompletionResponse::into_content)
            .map_err(|e| (DispatchError::Backend(e), mode.dialect))?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match self.accountant.count_tokens(&request.messages, &content, model) {
            Ok(usage) => {
                let cost_usd = self
                    .store
                    .models()
                    .get(model)
                    .map_or(0.0, |m| m.estimate_cost(&usage));
                info!(
                    model,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    cost_usd,
                    latency_ms,
                    "completion succeeded"
                );
            }
            Err(e) => info!(model, latency_ms, error = %e, "completion succeeded without estimate"),
        }

        if self.history_enabled {
            let target = state.resolved_target(key);
            if let Err(e) = self
                .store
                .record_history(ChatHistoryEntry::new(target, user_text))
                .await
            {
                warn!(target = %target, error = %e, "failed to record chat history");
            }
        }

        Ok(Completion {
            text: format(&content, mode.dialect),
            dialect: mode.dialect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::history::{HistoryStore, InMemoryChatDirectory, InMemoryHistoryStore};
    use crate::mode::{ModeCatalog, ModeDescriptor};
    use crate::state::{ConversationState, InMemoryStateStorage, StateStorage};
    use async_trait::async_trait;
    use parley_ai::{CompletionResponse, ModelCatalog};
    use std::sync::Mutex;

    fn storage_down() -> StorageError {
        StorageError::Backend {
            reason: "connection reset".to_string(),
        }
    }

    /// History that refuses every write.
    struct FailingHistory;

    #[async_trait]
    impl HistoryStore for FailingHistory {
        async fn append(&self, _entry: ChatHistoryEntry) -> Result<(), StorageError> {
            Err(storage_down())
        }

        async fn list(&self, _key: ConversationKey) -> Result<Vec<ChatHistoryEntry>, StorageError> {
            Ok(Vec::new())
        }

        async fn delete(&self, _key: ConversationKey) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    /// State storage that cannot be reached.
    struct FailingState;

    #[async_trait]
    impl StateStorage for FailingState {
        async fn load(
            &self,
            _key: ConversationKey,
        ) -> Result<Option<ConversationState>, StorageError> {
            Err(storage_down())
        }

        async fn save(
            &self,
            _key: ConversationKey,
            _state: &ConversationState,
        ) -> Result<(), StorageError> {
            Err(storage_down())
        }

        async fn delete(&self, _key: ConversationKey) -> Result<u64, StorageError> {
            Err(storage_down())
        }
    }

    /// Replays one canned outcome and records every request.
    struct ScriptedBackend {
        outcome: Result<CompletionResponse, LlmError>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(outcome: Result<CompletionResponse, LlmError>) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.requests.lock().expect("lock").push(request.clone());
            self.outcome.clone()
        }
    }

    const KEY: ConversationKey = ConversationKey::new(77);

    fn modes() -> ModeCatalog {
        ModeCatalog::new(
            "assistant",
            vec![
                ModeDescriptor::new("assistant", "Assistant")
                    .with_system_prompt("You are helpful.")
                    .with_dialect(RenderDialect::Html),
                ModeDescriptor::new("concise", "Concise").with_dialect(RenderDialect::MarkdownV2),
            ],
        )
    }

    fn setup(
        outcome: Result<CompletionResponse, LlmError>,
    ) -> (Dispatcher, Arc<ConversationStore>, Arc<ScriptedBackend>) {
        let store = ConversationStore::in_memory(
            Arc::new(ModelCatalog::default()),
            Arc::new(modes()),
        );
        setup_over(store, outcome)
    }

    fn setup_over(
        store: ConversationStore,
        outcome: Result<CompletionResponse, LlmError>,
    ) -> (Dispatcher, Arc<ConversationStore>, Arc<ScriptedBackend>) {
        let store = Arc::new(store);
        let backend = ScriptedBackend::new(outcome);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            backend.clone(),
            TokenAccountant::new(Arc::new(store.models().clone())),
        );
        (dispatcher, store, backend)
    }

    fn store_over(
        states: Arc<dyn StateStorage>,
        history: Arc<dyn HistoryStore>,
        modes: ModeCatalog,
    ) -> ConversationStore {
        ConversationStore::new(
            states,
            history,
            Arc::new(InMemoryChatDirectory::new()),
            Arc::new(ModelCatalog::default()),
            Arc::new(modes),
        )
    }

    #[tokio::test]
    async fn success_is_formatted_and_recorded() {
        let (dispatcher, store, backend) = setup(Ok(CompletionResponse::with_content("Hello")));

        let reply = dispatcher.respond(KEY, "Hi there").await;

        assert_eq!(
            reply,
            Completion {
                text: "Hello".to_string(),
                dialect: RenderDialect::Html
            }
        );
        let history = store.history(KEY).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "Hi there");

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gpt-3.5-turbo");
        assert_eq!(
            requests[0].messages,
            vec![
                ChatMessage::system("You are helpful."),
                ChatMessage::user("Hi there")
            ]
        );
    }

    #[tokio::test]
    async fn code_fences_are_rendered() {
        let (dispatcher, _, _) = setup(Ok(CompletionResponse::with_content("```x = 1```")));
        let reply = dispatcher.respond(KEY, "code please").await;
        assert_eq!(reply.text, "<pre>x = 1</pre>");
    }

    #[tokio::test]
    async fn quota_error_is_distinct_and_not_recorded() {
        let (dispatcher, store, _) = setup(Err(LlmError::QuotaExceeded));

        let reply = dispatcher.respond(KEY, "Hi").await;

        assert_eq!(reply.text, QUOTA_MESSAGE);
        assert!(store.history(KEY).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn structured_error_gets_generic_message() {
        let (dispatcher, store, _) = setup(Ok(CompletionResponse {
            choices: Vec::new(),
            error: Some(parley_ai::ApiError {
                message: "model overloaded".to_string(),
                ..Default::default()
            }),
        }));

        let reply = dispatcher.respond(KEY, "Hi").await;

        assert_eq!(reply.text, ERROR_MESSAGE);
        assert!(store.history(KEY).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn empty_choices_get_could_not_process() {
        let (dispatcher, _, _) = setup(Ok(CompletionResponse::default()));
        assert_eq!(dispatcher.respond(KEY, "Hi").await.text, EMPTY_MESSAGE);
    }

    #[tokio::test]
    async fn transport_and_malformed_collapse_to_failure() {
        let (dispatcher, _, _) = setup(Err(LlmError::Transport {
            reason: "connection refused".to_string(),
        }));
        assert_eq!(dispatcher.respond(KEY, "Hi").await.text, FAILURE_MESSAGE);

        let (dispatcher, _, _) = setup(Err(LlmError::MalformedResponse {
            reason: "expected value".to_string(),
        }));
        assert_eq!(dispatcher.respond(KEY, "Hi").await.text, FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn failure_kinds_stay_distinguishable() {
        let (dispatcher, _, _) = setup(Err(LlmError::Timeout));
        let (err, _) = dispatcher.try_respond(KEY, "Hi").await.expect_err("fails");
        assert_eq!(err, DispatchError::Backend(LlmError::Timeout));
    }

    #[tokio::test]
    async fn history_follows_active_target() {
        let (dispatcher, store, _) = setup(Ok(CompletionResponse::with_content("ok")));
        let target = ConversationKey::new(500);
        store.set_target(KEY, target).await.expect("target");

        dispatcher.respond(KEY, "into the other chat").await;

        assert!(store.history(KEY).await.expect("history").is_empty());
        let history = store.history(target).await.expect("history");
        assert_eq!(history[0].message, "into the other chat");
    }

    #[tokio::test]
    async fn disabled_history_records_nothing() {
        let (dispatcher, store, _) = setup(Ok(CompletionResponse::with_content("ok")));
        let dispatcher = dispatcher.with_history(false);
        dispatcher.respond(KEY, "Hi").await;
        assert!(store.history(KEY).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn markdown_mode_escapes_and_omits_empty_prompt() {
        let (dispatcher, store, backend) = setup(Ok(CompletionResponse::with_content("v1.2!")));
        store.set_mode(KEY, "concise").await.expect("mode");

        let reply = dispatcher.respond(KEY, "version?").await;

        assert_eq!(reply.text, "v1\\.2\\!");
        assert_eq!(reply.dialect, RenderDialect::MarkdownV2);
        assert_eq!(backend.requests()[0].messages, vec![ChatMessage::user("version?")]);
    }

    #[tokio::test]
    async fn error_messages_are_rendered_in_mode_dialect() {
        let (dispatcher, store, _) = setup(Err(LlmError::EmptyResponse));
        store.set_mode(KEY, "concise").await.expect("mode");
        let reply = dispatcher.respond(KEY, "Hi").await;
        assert_eq!(reply.text, format(EMPTY_MESSAGE, RenderDialect::MarkdownV2));
    }

    #[tokio::test]
    async fn selected_model_is_sent() {
        let (dispatcher, store, backend) = setup(Ok(CompletionResponse::with_content("ok")));
        store.set_model(KEY, "gpt-4").await.expect("model");
        dispatcher.respond(KEY, "Hi").await;
        assert_eq!(backend.requests()[0].model, "gpt-4");
    }

    #[tokio::test]
    async fn failed_history_write_still_replies() {
        let store = store_over(
            Arc::new(InMemoryStateStorage::new()),
            Arc::new(FailingHistory),
            modes(),
        );
        let (dispatcher, _, backend) =
            setup_over(store, Ok(CompletionResponse::with_content("```x```")));

        let reply = dispatcher.respond(KEY, "Hi").await;

        assert_eq!(
            reply,
            Completion {
                text: "<pre>x</pre>".to_string(),
                dialect: RenderDialect::Html
            }
        );
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_state_gets_failure_message() {
        let store = store_over(
            Arc::new(FailingState),
            Arc::new(InMemoryHistoryStore::new()),
            modes(),
        );
        let (dispatcher, _, backend) = setup_over(store, Ok(CompletionResponse::with_content("ok")));

        let (err, dialect) = dispatcher.try_respond(KEY, "Hi").await.expect_err("fails");
        assert_eq!(
            err,
            DispatchError::State(StateError::Persistence {
                reason: storage_down().to_string()
            })
        );
        assert_eq!(dialect, RenderDialect::Html);

        assert_eq!(dispatcher.respond(KEY, "Hi").await.text, FAILURE_MESSAGE);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_mode_catalog_fails_without_calling_backend() {
        let store = store_over(
            Arc::new(InMemoryStateStorage::new()),
            Arc::new(InMemoryHistoryStore::new()),
            ModeCatalog::new("assistant", Vec::new()),
        );
        let (dispatcher, _, backend) = setup_over(store, Ok(CompletionResponse::with_content("ok")));

        let reply = dispatcher.respond(KEY, "Hi").await;

        assert_eq!(reply.text, FAILURE_MESSAGE);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn blank_answer_is_treated_as_empty() {
        let (dispatcher, store, _) = setup(Ok(CompletionResponse::with_content("")));

        let reply = dispatcher.respond(KEY, "Hi").await;

        assert_eq!(reply.text, EMPTY_MESSAGE);
        assert!(store.history(KEY).await.expect("history").is_empty());
    }
}
