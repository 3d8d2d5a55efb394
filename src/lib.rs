//! claude_relay: drive Claude Code sessions from Telegram.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod bridge;
pub mod chat;
pub mod claude;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod markup;
pub mod permissions;
pub mod process;
pub mod session;
pub mod telegram;
pub mod tunnel;

/// Return the relay's home directory.
///
/// Resolution order:
/// 1. `CLAUDE_RELAY_HOME` environment variable
/// 2. `$HOME/.claude-relay`
pub fn relay_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("CLAUDE_RELAY_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".claude-relay")
    }
}
