//! Slash commands and inline-button callbacks.

use std::sync::Arc;

use tracing::{debug, warn};

use super::Bridge;
use crate::chat::{is_authorized, Button, Keyboard};
use crate::markup::escape_html;
use crate::permissions::allowed_tools_for;
use crate::session::{ConversationState, RemoveError, Session};

/// Metadata for one command, used to render `/help`.
struct CommandInfo {
    usage: &'static str,
    description: &'static str,
}

const COMMANDS: &[CommandInfo] = &[
    CommandInfo { usage: "/c &lt;msg&gt;", description: "Continue conversation" },
    CommandInfo { usage: "/new &lt;msg&gt;", description: "Fresh session" },
    CommandInfo { usage: "/dir path", description: "Switch directory (relative to ~)" },
    CommandInfo { usage: "/dirs", description: "List sessions + buttons" },
    CommandInfo { usage: "/rmdir path", description: "Forget a session" },
    CommandInfo { usage: "/compact", description: "Compact context" },
    CommandInfo { usage: "/cancel", description: "Stop current task" },
    CommandInfo { usage: "/status", description: "Check status" },
];

/// A slash command split into its lowercase name and the remaining text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedCommand<'a> {
    pub name: String,
    pub args: &'a str,
}

/// Parse `/name@bot args…`.  The bot suffix Telegram appends in groups is dropped.
pub(crate) fn parse_command(raw: &str) -> Option<ParsedCommand<'_>> {
    let without_slash = raw.trim().strip_prefix('/')?.trim_start();
    let (word, args) = without_slash
        .split_once(char::is_whitespace)
        .unwrap_or((without_slash, ""));
    if word.is_empty() {
        return None;
    }
    let args = args.trim();
    let name = word.split('@').next().unwrap_or(word).to_lowercase();
    Some(ParsedCommand { name, args })
}

fn help_text() -> String {
    let mut text = String::from("<b>Claude Code</b> via Telegram\n\n<b>Commands</b>\n");
    for c in COMMANDS {
        text.push_str(&format!("<code>{}</code> — {}\n", c.usage, c.description));
    }
    text.push_str(
        "\n<b>Tips</b>\n\
         • Just type to chat — auto-continues for 10 min\n\
         • <code>/dir projects/foo</code> = ~/projects/foo\n\
         • Tap buttons in /dirs to switch",
    );
    text
}

fn running_label(session: &Session) -> &'static str {
    if session.is_running() {
        "🔄 running"
    } else {
        "💤 idle"
    }
}

impl Bridge {
    /// Dispatch a `/command` from an authorized chat.
    pub(crate) async fn handle_command(&self, chat_id: &str, text: &str) {
        let Some(cmd) = parse_command(text) else {
            return;
        };
        debug!(command = %cmd.name, "slash command");

        match cmd.name.as_str() {
            "start" | "help" => {
                self.send_html(chat_id, &help_text()).await;
            }
            "c" | "continue" => {
                if cmd.args.is_empty() {
                    self.send_html(chat_id, "Usage: <code>/c &lt;message&gt;</code>").await;
                } else {
                    self.run_assistant(cmd.args, chat_id, true, Vec::new()).await;
                }
            }
            "new" => {
                if cmd.args.is_empty() {
                    self.send_html(chat_id, "Usage: <code>/new &lt;message&gt;</code>").await;
                } else {
                    self.registry.current().reset_conversation();
                    self.run_assistant(cmd.args, chat_id, false, Vec::new()).await;
                }
            }
            "dir" => {
                if cmd.args.is_empty() {
                    self.show_current_dir(chat_id).await;
                } else {
                    self.switch_dir(chat_id, cmd.args).await;
                }
            }
            "dirs" => self.list_dirs(chat_id).await,
            "rmdir" => self.remove_dir(chat_id, cmd.args).await,
            "compact" => {
                let session = self.registry.current();
                if session.is_running() {
                    self.send_html(chat_id, "⏳ Claude is busy — use <code>/cancel</code> first")
                        .await;
                    return;
                }
                self.send_html(
                    chat_id,
                    &format!(
                        "🗜 <i>Compacting context for {}...</i>",
                        escape_html(&session.short_name())
                    ),
                )
                .await;
                self.run_in(session, "/compact", chat_id, true, Vec::new()).await;
            }
            "cancel" => {
                let current = self.registry.current();
                let target = if current.is_running() {
                    Some(current)
                } else {
                    self.registry.running_session()
                };
                let cancelled = match target {
                    Some(session) => session.cancel().await.then_some(session),
                    None => None,
                };
                match cancelled {
                    Some(session) => {
                        self.send_html(
                            chat_id,
                            &format!("🛑 Cancelled <code>{}</code>", escape_html(&session.short_name())),
                        )
                        .await;
                    }
                    None => {
                        self.send_html(chat_id, "Nothing to cancel").await;
                    }
                }
            }
            "status" => {
                let session = self.registry.current();
                let status = if session.is_running() {
                    "🔄 <b>Running</b>"
                } else {
                    "💤 <b>Idle</b>"
                };
                let conv = match session.conversation_state() {
                    ConversationState::Continuing => "in conversation",
                    ConversationState::Fresh => "new session",
                };
                self.send_html(
                    chat_id,
                    &format!(
                        "📂 <code>{}</code>\n{status} • {conv}",
                        escape_html(&session.short_name())
                    ),
                )
                .await;
            }
            _ => {
                self.send_html(
                    chat_id,
                    &format!(
                        "Unknown command — try <code>/c {}</code> to continue",
                        escape_html(text)
                    ),
                )
                .await;
            }
        }
    }

    /// Handle an inline button press.
    pub(crate) async fn handle_callback(&self, callback_id: &str, chat_id: &str, data: &str) {
        if !is_authorized(&self.settings.chat_id, chat_id) {
            warn!(chat_id, "unauthorized callback ignored");
            return;
        }
        if let Err(e) = self.transport.answer_callback(callback_id).await {
            debug!(error = %e, "answerCallbackQuery failed");
        }

        if let Some(reply) = data.strip_prefix("reply:") {
            self.run_assistant(reply, chat_id, true, Vec::new()).await;
        } else if let Some(key) = data.strip_prefix("dir:") {
            match key.parse::<u64>().ok().and_then(|k| self.registry.switch_to_key(k)) {
                Some(session) => self.report_switch(chat_id, &session).await,
                None => {
                    self.send_html(chat_id, "That session is gone — see <code>/dirs</code>")
                        .await;
                }
            }
        } else if data == "perm:allow" {
            self.approve_permissions(chat_id).await;
        } else if data == "perm:deny" {
            self.permissions.take(chat_id);
            self.send_html(chat_id, "❌ Permission denied. Request cancelled.").await;
        } else {
            debug!(data, "unknown callback data");
        }
    }

    async fn approve_permissions(&self, chat_id: &str) {
        let Some(pending) = self.permissions.take(chat_id) else {
            self.send_html(chat_id, "No pending permission request.").await;
            return;
        };
        let grants = allowed_tools_for(&pending.denials);
        debug!(grants = ?grants, dir = %pending.session_dir.display(), "retrying with grants");

        self.send_html(chat_id, "✅ <i>Retrying with permissions...</i>").await;

        let session = self.registry.get_or_create(&pending.session_dir);
        self.run_in(session, &pending.original_message, chat_id, true, grants)
            .await;
    }

    async fn switch_dir(&self, chat_id: &str, input: &str) {
        let session = self.registry.switch_to(input);
        self.report_switch(chat_id, &session).await;
    }

    async fn report_switch(&self, chat_id: &str, session: &Session) {
        let state = session.conversation_state();

        let mut msg = format!(
            "📂 Switched to <code>{}</code>\nStatus: {} • {}",
            escape_html(&session.short_name()),
            running_label(session),
            state.label()
        );
        if !session.context_shown() && state == ConversationState::Fresh {
            if let Some(context) = self.previous_context(session) {
                msg.push_str(&format!("\n\n📜 <b>Previous context:</b>\n<i>{context}</i>"));
                session.mark_context_shown();
            }
        }
        self.send_html(chat_id, &msg).await;
    }

    async fn show_current_dir(&self, chat_id: &str) {
        let current = self.registry.current();
        let sessions = self.registry.list();
        let name = escape_html(&current.short_name());
        if sessions.len() > 1 {
            let keyboard = session_keyboard(&sessions, &current);
            self.send_html_with(
                chat_id,
                &format!(
                    "📂 Current: <code>{name}</code>\n\n\
                     Select or add new: <code>/dir projects/foo</code>\n\
                     <i>(paths are relative to home)</i>"
                ),
                Some(&keyboard),
            )
            .await;
        } else {
            self.send_html(
                chat_id,
                &format!(
                    "📂 Current: <code>{name}</code>\n\n\
                     Usage: <code>/dir projects/foo</code>\n\
                     <i>(paths are relative to home)</i>"
                ),
            )
            .await;
        }
    }

    async fn list_dirs(&self, chat_id: &str) {
        let sessions = self.registry.list();
        if sessions.is_empty() {
            self.send_html(chat_id, "No active sessions").await;
            return;
        }
        let current_dir = self.registry.current_dir();
        let mut lines = vec!["<b>Active Sessions</b>\n".to_string()];
        for (i, s) in sessions.iter().enumerate() {
            let marker = if s.working_dir() == current_dir { "→ " } else { "  " };
            let status = if s.is_running() { "🔄" } else { "💤" };
            lines.push(format!(
                "{marker}{}. {status} <code>{}</code>",
                i + 1,
                escape_html(&s.short_name())
            ));
        }
        let current = self.registry.current();
        let keyboard = session_keyboard(&sessions, &current);
        self.send_html_with(chat_id, &lines.join("\n"), Some(&keyboard))
            .await;
    }

    async fn remove_dir(&self, chat_id: &str, input: &str) {
        if input.is_empty() {
            self.send_html(chat_id, "Usage: <code>/rmdir path</code>").await;
            return;
        }
        let dir = self.registry.normalize(input);
        let msg = match self.registry.remove(&dir) {
            Ok(removed) => {
                let current = self.registry.current();
                format!(
                    "🗑 Removed <code>{}</code>\n📂 Current: <code>{}</code>",
                    escape_html(&removed.short_name()),
                    escape_html(&current.short_name())
                )
            }
            Err(RemoveError::Running(name)) => format!(
                "⏳ <code>{}</code> is running — use <code>/cancel</code> first",
                escape_html(&name)
            ),
            Err(RemoveError::NotFound(_)) => format!(
                "No session for <code>{}</code>",
                escape_html(&dir.display().to_string())
            ),
        };
        self.send_html(chat_id, &msg).await;
    }
}

/// Two-per-row picker; the current session is ticked.  Buttons carry the
/// session key rather than its path to stay within Telegram's 64-byte
/// callback data limit.
fn session_keyboard(sessions: &[Arc<Session>], current: &Arc<Session>) -> Keyboard {
    let buttons = sessions
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let tick = if Arc::ptr_eq(s, current) { "✓ " } else { "" };
            Button::new(
                format!("{tick}{}. {}", i + 1, s.short_name()),
                format!("dir:{}", s.key()),
            )
        })
        .collect();
    Keyboard::rows(buttons, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_args() {
        let c = parse_command("/Dir  projects/foo ").unwrap();
        assert_eq!(c.name, "dir");
        assert_eq!(c.args, "projects/foo");
    }

    #[test]
    fn strips_bot_mention() {
        let c = parse_command("/status@relay_bot").unwrap();
        assert_eq!(c.name, "status");
        assert_eq!(c.args, "");
    }

    #[test]
    fn bare_slash_is_not_a_command() {
        assert!(parse_command("/").is_none());
        assert!(parse_command("/   ").is_none());
        assert!(parse_command("hello").is_none());
    }

    #[test]
    fn space_after_slash_is_skipped() {
        let c = parse_command("/  c hello").unwrap();
        assert_eq!(c.name, "c");
        assert_eq!(c.args, "hello");

        let c = parse_command("/ é").unwrap();
        assert_eq!(c.name, "é");
        assert_eq!(c.args, "");

        let c = parse_command("/dir\tprojects/ü  ").unwrap();
        assert_eq!(c.name, "dir");
        assert_eq!(c.args, "projects/ü");
    }

    #[test]
    fn picker_data_fits_telegram_limit() {
        let registry = crate::session::SessionRegistry::new(
            "/home/me",
            "/home/me",
            std::time::Duration::from_secs(600),
        );
        let long = registry.switch_to("/home/me/work/clients/acme-corporation/backend-services/payments-api");
        assert!(long.working_dir().as_os_str().len() > 60);
        let sessions = registry.list();
        let kb = session_keyboard(&sessions, &long);
        for b in kb.inline_keyboard.concat() {
            assert!(b.callback_data.len() <= 64, "{}", b.callback_data);
        }
        assert!(kb
            .inline_keyboard
            .concat()
            .iter()
            .any(|b| b.callback_data == format!("dir:{}", long.key())));
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for c in COMMANDS {
            assert!(help.contains(c.usage));
        }
    }
}
