//! Recover session ids and recent prompts from the CLI's on-disk logs.
//!
//! The CLI keeps one directory per project under `<claude home>/projects`,
//! named after the absolute working directory with `/` replaced by `-`,
//! and one `<session-id>.jsonl` log per conversation inside it.  Sub-agent
//! logs are prefixed `agent-` and never count as a conversation.
//!
//! Every lookup here is best effort: a missing tree, unreadable file or
//! malformed line simply yields nothing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;
use tracing::debug;

/// Number of prior user messages surfaced as context.
pub const CONTEXT_MESSAGES: usize = 5;
/// Character budget per surfaced message.
pub const CONTEXT_MESSAGE_CHARS: usize = 100;
/// Shorter user entries ("ok", "y") carry no useful context.
const MIN_MESSAGE_CHARS: usize = 3;

#[derive(Debug, Clone)]
pub struct SessionResolver {
    projects_dir: PathBuf,
}

impl SessionResolver {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    /// Locate the project directory for `working_dir`.
    ///
    /// An exact match on the encoded absolute path wins.  Otherwise the
    /// first directory (in name order) whose name contains the final path
    /// component is used; two projects sharing a basename can therefore be
    /// confused, which is accepted.
    pub fn project_dir(&self, working_dir: &Path) -> Option<PathBuf> {
        let abs = fs::canonicalize(working_dir).unwrap_or_else(|_| working_dir.to_path_buf());
        let encoded = encode_project_path(&abs);
        let bare = encoded.trim_start_matches('-').to_string();

        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.projects_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        candidates.sort();

        if let Some(hit) = candidates.iter().find(|p| {
            file_name(p).is_some_and(|name| name == encoded || name == bare)
        }) {
            return Some(hit.clone());
        }

        let last = abs.file_name()?.to_string_lossy().into_owned();
        if last.is_empty() {
            return None;
        }
        let fallback = candidates
            .into_iter()
            .find(|p| file_name(p).is_some_and(|name| name.contains(&last)));
        if let Some(p) = &fallback {
            debug!(dir = %working_dir.display(), project = %p.display(), "project matched by basename");
        }
        fallback
    }

    /// Most recently modified conversation log for `working_dir`.
    pub fn latest_log(&self, working_dir: &Path) -> Option<PathBuf> {
        let project = self.project_dir(working_dir)?;
        fs::read_dir(&project)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_conversation_log(p))
            .filter_map(|p| {
                let mtime = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((mtime, p))
            })
            .max_by(|(a_time, a_path), (b_time, b_path)| {
                a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
            })
            .map(|(_, p): (SystemTime, PathBuf)| p)
    }

    /// Session id of the most recent conversation in `working_dir`.
    pub fn latest_session_id(&self, working_dir: &Path) -> Option<String> {
        let log = self.latest_log(working_dir)?;
        log.file_stem().map(|s| s.to_string_lossy().into_owned())
    }

    /// Last few user prompts of the most recent conversation, oldest first.
    pub fn previous_context(&self, working_dir: &Path) -> Vec<String> {
        match self.latest_log(working_dir) {
            Some(log) => recent_user_messages(&log, CONTEXT_MESSAGES),
            None => Vec::new(),
        }
    }
}

/// `/home/me/app` → `-home-me-app`.
pub fn encode_project_path(abs: &Path) -> String {
    abs.to_string_lossy().replace('/', "-")
}

fn file_name(p: &Path) -> Option<String> {
    p.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn is_conversation_log(p: &Path) -> bool {
    p.is_file()
        && p.extension().is_some_and(|e| e == "jsonl")
        && file_name(p).is_some_and(|n| !n.starts_with("agent-"))
}

/// The last `limit` user-authored texts in a conversation log.
///
/// Entries starting with `<` are injected by the CLI (command output,
/// reminders) and are skipped, as are very short ones.
pub fn recent_user_messages(log: &Path, limit: usize) -> Vec<String> {
    let contents = match fs::read_to_string(log) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %log.display(), error = %e, "cannot read conversation log");
            return Vec::new();
        }
    };

    let mut messages: Vec<String> = contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter(|v| v.get("type").and_then(Value::as_str) == Some("user"))
        .filter_map(|v| user_text(&v))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.starts_with('<') && t.chars().count() >= MIN_MESSAGE_CHARS)
        .map(|t| truncate_chars(&t, CONTEXT_MESSAGE_CHARS))
        .collect();

    let skip = messages.len().saturating_sub(limit);
    messages.drain(..skip);
    messages
}

/// `message.content` is either a string or a list of typed blocks.
fn user_text(record: &Value) -> Option<String> {
    match record.get("message")?.get("content")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let text: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if text.is_empty() {
                None
            } else {
                Some(text.join(" "))
            }
        }
        _ => None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head.trim_end())
    }
}
