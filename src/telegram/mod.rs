//! Telegram Bot API client.
//!
//! Implements [`ChatTransport`] over plain HTTPS calls and exposes the
//! webhook-management and `getUpdates` methods the operating modes need.

pub mod polling;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::chat::{ChatTransport, Keyboard, MessageId, ParseMode};
use crate::config::Config;
use types::{ApiResponse, SentMessage, Update};

/// Update kinds the bot subscribes to.
const ALLOWED_UPDATES: [&str; 2] = ["message", "callback_query"];
/// Ordinary calls; long polls get their own, longer timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram {method} failed: {description}")]
    Api { method: String, description: String },
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    /// `<api_base>/bot<token>`; never logged.
    base: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let token = cfg
            .bot_token()
            .ok_or_else(|| anyhow::anyhow!("telegram token is not configured"))?;
        Self::new(&cfg.telegram.api_base, &token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<T, TelegramError> {
        let mut req = self.http.post(format!("{}/{method}", self.base)).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req.send().await?;
        let status = resp.status();
        // Error replies are JSON too; prefer their description over the status line.
        let parsed: ApiResponse<T> = match resp.json().await {
            Ok(p) => p,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(TelegramError::Api {
                    method: method.to_string(),
                    description: status.to_string(),
                })
            }
        };
        if !parsed.ok {
            let description = parsed.description.unwrap_or_else(|| status.to_string());
            debug!(method, %status, %description, "telegram api error");
            return Err(TelegramError::Api {
                method: method.to_string(),
                description,
            });
        }
        parsed.result.ok_or_else(|| TelegramError::Api {
            method: method.to_string(),
            description: "response carried no result".to_string(),
        })
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ALLOWED_UPDATES,
            }),
            Some(Duration::from_secs(timeout_secs + 10)),
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), TelegramError> {
        let mut body = json!({ "url": url, "allowed_updates": ALLOWED_UPDATES });
        if let Some(secret) = secret {
            body["secret_token"] = Value::String(secret.to_string());
        }
        let _: bool = self.call("setWebhook", &body, None).await?;
        Ok(())
    }

    /// `setWebhook` with up to `attempts` tries and a growing pause between them.
    /// A fresh tunnel hostname often takes a few seconds to resolve.
    pub async fn set_webhook_with_retry(
        &self,
        url: &str,
        secret: Option<&str>,
        attempts: u32,
        base_delay: Duration,
    ) -> Result<(), TelegramError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.set_webhook(url, secret).await {
                Ok(()) => {
                    info!(attempt, "webhook registered");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    let delay = base_delay * attempt;
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "setWebhook failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self.call("deleteWebhook", &json!({}), None).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<MessageId> {
        // The API rejects empty text.
        let text = if text.trim().is_empty() { "(empty)" } else { text };
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if mode == ParseMode::Html {
            body["parse_mode"] = Value::from("HTML");
        }
        if let Some(kb) = keyboard.filter(|kb| !kb.is_empty()) {
            body["reply_markup"] = serde_json::to_value(kb)?;
        }
        let sent: SentMessage = self.call("sendMessage", &body, None).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &str,
        mode: ParseMode,
    ) -> anyhow::Result<()> {
        let mut body = json!({ "chat_id": chat_id, "message_id": message_id, "text": text });
        if mode == ParseMode::Html {
            body["parse_mode"] = Value::from("HTML");
        }
        // Returns the edited Message (or `true` for inline messages).
        let _: Value = self.call("editMessageText", &body, None).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> anyhow::Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
                None,
            )
            .await?;
        Ok(())
    }
}
