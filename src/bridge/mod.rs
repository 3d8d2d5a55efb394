//! Chat bridge: turns chat events into CLI invocations and relays results.
//!
//! The [`Bridge`] owns nothing global.  Sessions live in the injected
//! [`SessionRegistry`], pending approvals in its [`PermissionTable`], and
//! all output goes through the injected [`ChatTransport`].

mod commands;
mod delivery;
mod status;

pub use delivery::{detect_options, split_text};
pub use status::{status_line, status_text};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chat::{
    is_authorized, Button, ChatTransport, Inbound, InboundHandler, Keyboard, MessageId, ParseMode,
};
use crate::claude::{ClaudeRunner, InvocationRequest, InvocationResult, InvokeError};
use crate::config::Config;
use crate::markup::escape_html;
use crate::permissions::{describe_denial, PendingPermission, PermissionTable};
use crate::session::{should_continue, ConversationState, Session, SessionRegistry};

/// Characters of partial output shown beneath a permission prompt.
const PERMISSION_PREVIEW_CHARS: usize = 500;

/// Delivery knobs, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// The only chat allowed to drive the bot.
    pub chat_id: String,
    pub chunk_size: usize,
    pub status_interval: Duration,
    pub chunk_delay: Duration,
}

impl BridgeSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            chat_id: cfg.chat_id().to_string(),
            chunk_size: cfg.bridge.chunk_size,
            status_interval: Duration::from_millis(cfg.bridge.status_interval_ms),
            chunk_delay: Duration::from_millis(cfg.bridge.chunk_delay_ms),
        }
    }
}

/// Snapshot served by `GET /health`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub status: &'static str,
    pub claude_running: bool,
    pub current_session: String,
    pub in_conversation: bool,
    pub active_sessions: usize,
}

pub struct Bridge {
    transport: Arc<dyn ChatTransport>,
    registry: Arc<SessionRegistry>,
    runner: ClaudeRunner,
    permissions: PermissionTable,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<SessionRegistry>,
        runner: ClaudeRunner,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            runner,
            permissions: PermissionTable::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Handle a text message from `chat_id`.
    pub async fn handle_message(&self, chat_id: &str, text: &str) {
        if !is_authorized(&self.settings.chat_id, chat_id) {
            warn!(chat_id, "unauthorized message ignored");
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if text.starts_with('/') {
            self.handle_command(chat_id, text).await;
            return;
        }

        let current = self.registry.current();
        let continuing = should_continue(current.conversation_state(), text);
        self.run_in(current, text, chat_id, continuing, Vec::new()).await;
    }

    /// Run `message` in the current session and relay the outcome.
    pub async fn run_assistant(
        &self,
        message: &str,
        chat_id: &str,
        continue_conversation: bool,
        allowed_tools: Vec<String>,
    ) {
        let session = self.registry.current();
        self.run_in(session, message, chat_id, continue_conversation, allowed_tools)
            .await;
    }

    /// Run `message` in `session`: claim it, show a status message, invoke
    /// the CLI, then send the answer or a permission prompt.
    pub async fn run_in(
        &self,
        session: Arc<Session>,
        message: &str,
        chat_id: &str,
        continue_conversation: bool,
        allowed_tools: Vec<String>,
    ) {
        let prefix = session_prefix(&session);

        let guard = match session.try_begin() {
            Ok(g) => g,
            Err(InvokeError::Busy(name)) => {
                debug!(session = %name, "rejecting prompt, session busy");
                self.send_html(
                    chat_id,
                    &format!("{prefix}⏳ Claude is busy — use <code>/cancel</code> to stop"),
                )
                .await;
                return;
            }
            Err(e) => {
                error!(error = %e, "could not claim session");
                return;
            }
        };

        // Only a resumed conversation has prior context worth showing.
        if continue_conversation
            && !session.context_shown()
            && session.conversation_state() == ConversationState::Fresh
        {
            if let Some(context) = self.previous_context(&session) {
                self.send_html(
                    chat_id,
                    &format!("{prefix}📜 <b>Resuming previous session:</b>\n<i>{context}</i>"),
                )
                .await;
                session.mark_context_shown();
            }
        }

        let status_id = self
            .send_html(
                chat_id,
                &format!("{prefix}{}", status_line(continue_conversation)),
            )
            .await;

        let (partial_tx, partial_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let animation = status_id.map(|id| {
            status::spawn_status_animation(
                Arc::clone(&self.transport),
                chat_id.to_string(),
                id,
                continue_conversation,
                prefix.clone(),
                self.settings.status_interval,
                partial_rx,
                stop.clone(),
            )
        });

        let request = InvocationRequest::new(message, session.working_dir())
            .continuing(continue_conversation)
            .with_session_id(session.session_id())
            .with_allowed_tools(allowed_tools);

        let outcome = self.runner.run(&guard, request, Some(partial_tx)).await;
        let cancelled = guard.cancellation().is_cancelled();
        drop(guard);

        // The animation must be gone before its message is.
        stop.cancel();
        if let Some(handle) = animation {
            let _ = handle.await;
        }
        if let Some(id) = status_id {
            if let Err(e) = self.transport.delete_message(chat_id, id).await {
                debug!(error = %e, "failed to delete status message");
            }
        }

        match outcome {
            Ok(_) if cancelled => {
                info!(dir = %session.working_dir().display(), "invocation cancelled, response dropped");
            }
            Ok(result) if !result.permission_denials.is_empty() => {
                self.send_permission_request(&session, &result, message, chat_id)
                    .await;
            }
            Ok(result) => {
                if !result.completed {
                    warn!(dir = %session.working_dir().display(), "claude exited without a result");
                }
                self.send_response(chat_id, &result.text).await;
            }
            Err(e) => {
                error!(error = %e, "claude invocation failed");
                self.send_html(
                    chat_id,
                    &format!(
                        "{prefix}❌ <b>Error:</b> <code>{}</code>",
                        escape_html(&e.to_string())
                    ),
                )
                .await;
            }
        }
    }

    /// Previous user prompts for a session, formatted for display.
    fn previous_context(&self, session: &Session) -> Option<String> {
        let messages = self.runner.resolver().previous_context(session.working_dir());
        if messages.is_empty() {
            return None;
        }
        Some(
            messages
                .iter()
                .map(|m| format!("• {}", escape_html(m)))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    async fn send_permission_request(
        &self,
        session: &Session,
        result: &InvocationResult,
        original_message: &str,
        chat_id: &str,
    ) {
        let prefix = session_prefix(session);
        let lines: Vec<String> = result.permission_denials.iter().map(describe_denial).collect();

        let replaced = self.permissions.insert(
            chat_id,
            PendingPermission {
                original_message: original_message.to_string(),
                denials: result.permission_denials.clone(),
                session_dir: session.working_dir().to_path_buf(),
            },
        );
        if replaced.is_some() {
            debug!(chat_id, "replaced an unanswered permission request");
        }

        let mut msg = format!("{prefix}⚠️ <b>Permission denied:</b>\n{}", lines.join("\n"));
        if !result.text.trim().is_empty() {
            let preview: String = result.text.chars().take(PERMISSION_PREVIEW_CHARS).collect();
            msg.push_str(&format!("\n\n<i>{}</i>", escape_html(&preview)));
        }

        let keyboard = Keyboard::rows(
            vec![
                Button::new("✅ Allow & Retry", "perm:allow"),
                Button::new("❌ Deny", "perm:deny"),
            ],
            2,
        );
        self.send_html_with(chat_id, &msg, Some(&keyboard)).await;
    }

    // ── Hooks & introspection ────────────────────────────────

    /// Relay a lifecycle hook event to the configured chat.
    pub async fn notify(&self, event_type: &str) -> anyhow::Result<()> {
        let text = notification_text(event_type);
        self.transport
            .send_message(&self.settings.chat_id, &text, ParseMode::Html, None)
            .await?;
        info!(event = event_type, "hook notification relayed");
        Ok(())
    }

    pub fn health(&self) -> HealthReport {
        let current = self.registry.current();
        HealthReport {
            status: "ok",
            claude_running: self.registry.any_running(),
            current_session: current.short_name(),
            in_conversation: current.conversation_state() == ConversationState::Continuing,
            active_sessions: self.registry.len(),
        }
    }

    // ── Sending helpers ──────────────────────────────────────

    async fn send_html(&self, chat_id: &str, text: &str) -> Option<MessageId> {
        self.send_html_with(chat_id, text, None).await
    }

    async fn send_html_with(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Option<MessageId> {
        match self
            .transport
            .send_message(chat_id, text, ParseMode::Html, keyboard)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "failed to send message");
                None
            }
        }
    }
}

#[async_trait]
impl InboundHandler for Bridge {
    async fn handle(&self, event: Inbound) {
        match event {
            Inbound::Message { chat_id, text } => self.handle_message(&chat_id, &text).await,
            Inbound::Callback { id, chat_id, data } => {
                self.handle_callback(&id, &chat_id, &data).await
            }
        }
    }
}

/// `[<code>name</code>] ` for non-default sessions, empty otherwise.
pub fn session_prefix(session: &Session) -> String {
    if session.is_default() {
        String::new()
    } else {
        format!("[<code>{}</code>] ", escape_html(&session.short_name()))
    }
}

/// Fixed chat notice for a hook event.
pub fn notification_text(event_type: &str) -> String {
    match event_type {
        "completed" => "✅ Claude has completed the task.".to_string(),
        "waiting" => "⏸ Claude is waiting for input.".to_string(),
        other => format!("📢 Claude event: {}", escape_html(other)),
    }
}
