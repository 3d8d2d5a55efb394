//! Transport-agnostic chat layer.
//!
//! Provides [`Inbound`] -- the two kinds of events the bridge reacts to --
//! and the [`ChatTransport`] trait a messaging platform implements to
//! deliver replies, edit status messages and answer button presses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Platform message identifier.
pub type MessageId = i64;

// ---------------------------------------------------------------------------
// Outbound formatting
// ---------------------------------------------------------------------------

/// How the platform should interpret message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    Plain,
}

/// An inline button that posts `callback_data` back when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub inline_keyboard: Vec<Vec<Button>>,
}

impl Keyboard {
    /// Lay `buttons` out `per_row` to a row.
    pub fn rows(buttons: Vec<Button>, per_row: usize) -> Self {
        let per_row = per_row.max(1);
        let mut rows: Vec<Vec<Button>> = Vec::new();
        for b in buttons {
            match rows.last_mut() {
                Some(row) if row.len() < per_row => row.push(b),
                _ => rows.push(vec![b]),
            }
        }
        Self { inline_keyboard: rows }
    }

    pub fn is_empty(&self) -> bool {
        self.inline_keyboard.iter().all(Vec::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// An event from the chat platform, reduced to what the bridge needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text message.
    Message { chat_id: String, text: String },
    /// An inline button press.
    Callback {
        id: String,
        chat_id: String,
        data: String,
    },
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Outbound half of a chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Send `text`, returning the new message's id.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<MessageId>;

    /// Replace the text of an earlier message.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &str,
        mode: ParseMode,
    ) -> anyhow::Result<()>;

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> anyhow::Result<()>;

    /// Acknowledge a button press so the client stops showing a spinner.
    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()>;
}

/// Consumer of inbound events (the bridge), fed by polling or the webhook.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, event: Inbound);
}

/// Only the configured chat may drive the bot.
pub fn is_authorized(allowed_chat_id: &str, chat_id: &str) -> bool {
    !allowed_chat_id.is_empty() && allowed_chat_id.trim() == chat_id.trim()
}
