//! Command routing.
//!
//! Inbound text is parsed once into a [`Command`], then dispatched by
//! match. Each key carries a small [`RouterState`] for the chat-naming
//! flow; everything that is not a command goes to the [`Dispatcher`].

use crate::dispatch::Dispatcher;
use crate::format::RenderDialect;
use crate::history::NamedChat;
use crate::state::ConversationStore;
use parley_core::ConversationKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

// Reply-keyboard labels. Incoming text is matched against these exactly.

/// Shows the welcome text and the main menu.
pub const START: &str = "🚀 Start";
pub const START_SLASH: &str = "/start";
/// Lists the available commands.
pub const HELP: &str = "ℹ️ Help";
pub const HELP_SLASH: &str = "/help";
/// Reports the current model, mode and chat.
pub const STATUS: &str = "📊 Status";
/// Opens the model picker.
pub const SETTINGS: &str = "⚙️ Settings";
/// Opens the mode picker.
pub const MODES: &str = "🎭 Modes";
/// Lists named chats.
pub const CHATS: &str = "💬 Chats";
/// Starts the chat-naming flow.
pub const CREATE_CHAT: &str = "🆕 Create Chat";
/// Opens the delete menu.
pub const DELETE_CHAT: &str = "❌ Delete Chat";
/// Returns to the main menu.
pub const BACK: &str = "🔙 Back";

const SWITCH_PREFIX: &str = "Chat ID: ";
const DELETE_PREFIX: &str = "Delete Chat ID: ";
const MODEL_PREFIX: &str = "Model: ";
const MODE_PREFIX: &str = "Mode: ";

/// The prompt whose reply names a new chat.
pub const CREATE_CHAT_PROMPT: &str = "Please provide a name for the new chat:";

const NO_CHATS: &str = "📭 No chats found.";
const CHAT_LIST_FAILED: &str = "❌ Error fetching chat list.";

/// One inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat_id: ConversationKey,
    pub text: String,
    /// Text of the message this one replies to, if any.
    pub reply_to_text: Option<String>,
}

impl Inbound {
    /// A message that replies to nothing.
    #[must_use]
    pub fn new(chat_id: ConversationKey, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to_text: None,
        }
    }

    /// Marks the message as a reply to `quoted`.
    #[must_use]
    pub fn replying_to(mut self, quoted: impl Into<String>) -> Self {
        self.reply_to_text = Some(quoted.into());
        self
    }
}

/// A platform-neutral reply keyboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<String>>,
}

impl Keyboard {
    fn push_row<I, S>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
        self
    }

    /// The main menu.
    #[must_use]
    pub fn main_menu() -> Self {
        Self::default()
            .push_row([START, HELP])
            .push_row([STATUS, SETTINGS])
            .push_row([MODES, CHATS])
    }
}

/// Markup attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMarkup {
    Keyboard(Keyboard),
    /// Asks the client to open a reply to this message.
    ForceReply,
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// `None` sends plain text.
    pub dialect: Option<RenderDialect>,
    pub markup: Option<ReplyMarkup>,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            dialect: None,
            markup: None,
        }
    }

    fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.markup = Some(ReplyMarkup::Keyboard(keyboard));
        self
    }
}

/// A parsed inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
    Settings,
    Modes,
    Chats,
    CreateChat,
    DeleteChatMenu,
    Back,
    SwitchChat(ConversationKey),
    SetModel(String),
    SetMode(String),
    DeleteChat(ConversationKey),
    /// A prefixed button whose argument did not parse.
    Malformed(String),
    /// Conversational input.
    Text(String),
}

impl Command {
    /// Parses inbound text. Labels match exactly; prefixed buttons match
    /// on their prefix and carry the remainder.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            START | START_SLASH => return Self::Start,
            HELP | HELP_SLASH => return Self::Help,
            STATUS => return Self::Status,
            SETTINGS => return Self::Settings,
            MODES => return Self::Modes,
            CHATS => return Self::Chats,
            CREATE_CHAT => return Self::CreateChat,
            DELETE_CHAT => return Self::DeleteChatMenu,
            BACK => return Self::Back,
            _ => {}
        }

        if let Some(rest) = text.strip_prefix(DELETE_PREFIX) {
            return leading_key(rest).map_or_else(|| Self::Malformed(text.to_string()), Self::DeleteChat);
        }
        if let Some(rest) = text.strip_prefix(SWITCH_PREFIX) {
            return leading_key(rest).map_or_else(|| Self::Malformed(text.to_string()), Self::SwitchChat);
        }
        if let Some(rest) = text.strip_prefix(MODEL_PREFIX) {
            return Self::SetModel(rest.trim().to_string());
        }
        if let Some(rest) = text.strip_prefix(MODE_PREFIX) {
            return Self::SetMode(rest.trim().to_string());
        }
        Self::Text(text.to_string())
    }
}

/// Extracts the key from `"<id>"` or `"<id> (<name>)"`.
fn leading_key(rest: &str) -> Option<ConversationKey> {
    let rest = rest.trim_start();
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(rest.len(), |(i, _)| i);
    let (digits, tail) = rest.split_at(end);
    if !(tail.is_empty() || tail.starts_with(' ')) {
        return None;
    }
    digits.parse().ok()
}

/// Per-key position in the chat-naming flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouterState {
    #[default]
    Idle,
    AwaitingChatName,
}

/// The command router.
pub struct Router {
    store: Arc<ConversationStore>,
    dispatcher: Arc<Dispatcher>,
    pending: Mutex<HashMap<ConversationKey, RouterState>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Router {
    /// Creates a router with every key idle.
    #[must_use]
    pub fn new(store: Arc<ConversationStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The key's position in the chat-naming flow.
    #[must_use]
    pub fn state(&self, key: ConversationKey) -> RouterState {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
            .unwrap_or_default()
    }

    /// Handles one inbound message. `None` means nothing is sent.
    pub async fn handle(&self, inbound: Inbound) -> Option<Reply> {
        let key = inbound.chat_id;
        let awaiting = self.take_pending(key) == RouterState::AwaitingChatName;
        let quotes_prompt = inbound.reply_to_text.as_deref() == Some(CREATE_CHAT_PROMPT);

        if awaiting && quotes_prompt {
            return Some(self.create_chat(key, &inbound.text).await);
        }

        let reply = match Command::parse(&inbound.text) {
            Command::Start | Command::Back => self.welcome(key).await,
            Command::Help => help(),
            Command::Status => self.status(key).await,
            Command::Settings => self.settings_menu(),
            Command::Modes => self.modes_menu(),
            Command::Chats => self.chat_menu().await,
            Command::DeleteChatMenu => self.delete_menu().await,
            Command::CreateChat => {
                self.set_pending(key, RouterState::AwaitingChatName);
                Reply {
                    markup: Some(ReplyMarkup::ForceReply),
                    ..Reply::plain(CREATE_CHAT_PROMPT)
                }
            }
            Command::SwitchChat(target) => match self.store.set_target(key, target).await {
                Ok(()) => Reply::plain(format!("Switched to chat {target}")),
                Err(e) => {
                    error!(chat_id = %key, error = %e, "failed to switch chat");
                    Reply::plain(format!("Failed to switch chat: {e}"))
                }
            },
            Command::SetModel(model) => match self.store.set_model(key, &model).await {
                Ok(()) => Reply::plain(format!("Model set to {model}")),
                Err(e) => Reply::plain(format!("Failed to set model: {e}")),
            },
            Command::SetMode(mode) => match self.store.set_mode(key, &mode).await {
                Ok(()) => {
                    let Some(descriptor) = self.store.modes().get(&mode) else {
                        return Some(Reply::plain(format!("Mode set to {mode}")));
                    };
                    let mut text = format!("Mode set to {}", descriptor.name);
                    if !descriptor.welcome.is_empty() {
                        text.push_str("\n\n");
                        text.push_str(&descriptor.welcome);
                    }
                    Reply::plain(text)
                }
                Err(e) => Reply::plain(format!("Failed to set mode: {e}")),
            },
            Command::DeleteChat(target) => match self.store.delete_conversation(target).await {
                Ok(()) => Reply::plain(format!("Chat {target} deleted successfully.")),
                Err(e) => {
                    warn!(chat_id = %key, target = %target, error = %e, "chat delete failed");
                    Reply::plain(format!("Failed to delete chat: {e}"))
                }
            },
            Command::Malformed(text) => {
                debug!(chat_id = %key, text = %text, "dropping malformed button");
                return None;
            }
            Command::Text(text) => {
                let input = match inbound.reply_to_text.as_deref() {
                    Some(quoted) if !quoted.is_empty() && quoted != CREATE_CHAT_PROMPT => {
                        format!("{quoted} {text}")
                    }
                    _ => text,
                };
                let completion = self.dispatcher.respond(key, &input).await;
                Reply {
                    text: completion.text,
                    dialect: Some(completion.dialect),
                    markup: None,
                }
            }
        };
        Some(reply)
    }

    async fn create_chat(&self, key: ConversationKey, name: &str) -> Reply {
        let name = name.trim();
        if name.is_empty() {
            return Reply::plain("Failed to create new chat.");
        }
        match self.store.create_chat(key, name).await {
            Ok(chat) => Reply::plain(format!(
                "New chat created with ID: {} and name: {}",
                chat.key, chat.name
            )),
            Err(e) => {
                error!(chat_id = %key, error = %e, "failed to create chat");
                Reply::plain("Failed to create new chat.")
            }
        }
    }

    async fn welcome(&self, key: ConversationKey) -> Reply {
        let modes = self.store.modes();
        let mode_id = match self.store.get_state(key).await {
            Ok(state) => state.active_mode,
            Err(e) => {
                warn!(chat_id = %key, error = %e, "state unavailable for welcome");
                modes.default_mode().to_string()
            }
        };
        let welcome = modes
            .resolve(&mode_id)
            .map(|m| m.welcome.clone())
            .unwrap_or_default();
        Reply::plain(welcome).with_keyboard(Keyboard::main_menu())
    }

    async fn status(&self, key: ConversationKey) -> Reply {
        let mut text = String::from("📊 All systems are operational.");
        match self.store.get_state(key).await {
            Ok(state) => {
                let mode = self
                    .store
                    .modes()
                    .resolve(&state.active_mode)
                    .map_or(state.active_mode.as_str(), |m| m.name.as_str());
                text.push_str(&format!(
                    "\nCurrent model: {}\nCurrent mode: {}\nActive chat: {}",
                    state.active_model,
                    mode,
                    state.resolved_target(key)
                ));
            }
            Err(e) => {
                warn!(chat_id = %key, error = %e, "state unavailable for status");
                text.push_str("\nCurrent model: Unknown");
            }
        }
        Reply::plain(text)
    }

    fn settings_menu(&self) -> Reply {
        let buttons = self.store.models().ids().map(|id| format!("{MODEL_PREFIX}{id}"));
        Reply::plain("⚙️ Select a model:").with_keyboard(paired_menu(buttons))
    }

    fn modes_menu(&self) -> Reply {
        let buttons = self
            .store
            .modes()
            .modes
            .iter()
            .map(|m| format!("{MODE_PREFIX}{}", m.id));
        Reply::plain("🎭 Select a mode:").with_keyboard(paired_menu(buttons))
    }

    async fn chat_menu(&self) -> Reply {
        let chats = match self.named_chats().await {
            Ok(chats) => chats,
            Err(reply) => return reply,
        };
        if chats.is_empty() {
            return Reply::plain(NO_CHATS)
                .with_keyboard(Keyboard::default().push_row([CREATE_CHAT]).push_row([BACK]));
        }

        let mut keyboard = Keyboard::default();
        for chat in &chats {
            keyboard = keyboard.push_row([format!("{SWITCH_PREFIX}{} ({})", chat.key, chat.name)]);
        }
        let keyboard = keyboard.push_row([CREATE_CHAT, DELETE_CHAT]).push_row([BACK]);
        Reply::plain("💬 Active chats:").with_keyboard(keyboard)
    }

    async fn delete_menu(&self) -> Reply {
        let chats = match self.named_chats().await {
            Ok(chats) => chats,
            Err(reply) => return reply,
        };
        if chats.is_empty() {
            return Reply::plain(NO_CHATS).with_keyboard(Keyboard::default().push_row([BACK]));
        }

        let mut keyboard = Keyboard::default();
        for chat in &chats {
            keyboard = keyboard.push_row([format!("{DELETE_PREFIX}{} ({})", chat.key, chat.name)]);
        }
        Reply::plain("❌ Select a chat to delete:").with_keyboard(keyboard.push_row([BACK]))
    }

    async fn named_chats(&self) -> Result<Vec<NamedChat>, Reply> {
        self.store.list_chats().await.map_err(|e| {
            error!(error = %e, "failed to list chats");
            Reply::plain(CHAT_LIST_FAILED)
        })
    }

    fn take_pending(&self, key: ConversationKey) -> RouterState {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .unwrap_or_default()
    }

    fn set_pending(&self, key: ConversationKey, state: RouterState) {
        info!(chat_id = %key, ?state, "router state changed");
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, state);
    }
}

fn help() -> Reply {
    let text = format!(
        "ℹ️ Here is a list of commands you can use:\n\
         {START} - show the welcome message\n\
         {HELP} - show this help\n\
         {STATUS} - show the current model, mode and chat\n\
         {SETTINGS} - choose a model\n\
         {MODES} - choose a mode\n\
         {CHATS} - switch, create or delete chats\n\
         Any other text is sent to the assistant."
    );
    Reply::plain(text)
}

/// Lays buttons out two per row, followed by Back.
fn paired_menu(buttons: impl Iterator<Item = String>) -> Keyboard {
    let buttons: Vec<String> = buttons.collect();
    let mut keyboard = Keyboard::default();
    for pair in buttons.chunks(2) {
        keyboard = keyboard.push_row(pair.iter().cloned());
    }
    keyboard.push_row([BACK])
}
