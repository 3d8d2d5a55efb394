//! The slice of the Bot API object model the relay reads.

use serde::Deserialize;

use crate::chat::Inbound;

/// Envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    /// Absent when the originating message is too old.
    #[serde(default)]
    pub message: Option<Message>,
}

/// `sendMessage` returns the created message; only its id matters.
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

impl Update {
    /// Reduce to a chat event.  Updates the bridge does not handle (edited
    /// messages, channel posts, callbacks without a message) yield `None`.
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(msg) = self.message {
            return Some(Inbound::Message {
                chat_id: msg.chat.id.to_string(),
                text: msg.text.unwrap_or_default(),
            });
        }
        let cb = self.callback_query?;
        let chat_id = cb.message?.chat.id.to_string();
        Some(Inbound::Callback {
            id: cb.id,
            chat_id,
            data: cb.data.unwrap_or_default(),
        })
    }
}
