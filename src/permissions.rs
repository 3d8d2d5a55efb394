//! Pending tool-permission requests and the grants derived from them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

use crate::claude::PermissionDenial;
use crate::markup::escape_html;

/// A prompt that was refused tool access, kept until the user decides.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPermission {
    /// The prompt to re-send on approval, unchanged.
    pub original_message: String,
    pub denials: Vec<PermissionDenial>,
    /// Directory of the session the prompt ran in.
    pub session_dir: PathBuf,
}

/// At most one pending request per chat; a newer one replaces the older.
#[derive(Debug, Default)]
pub struct PermissionTable {
    pending: Mutex<HashMap<String, PendingPermission>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingPermission>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `request` for `chat_id`, returning the one it replaced.
    pub fn insert(&self, chat_id: &str, request: PendingPermission) -> Option<PendingPermission> {
        self.lock().insert(chat_id.to_string(), request)
    }

    /// Remove and return the pending request for `chat_id`.
    pub fn take(&self, chat_id: &str) -> Option<PendingPermission> {
        self.lock().remove(chat_id)
    }

    pub fn get(&self, chat_id: &str) -> Option<PendingPermission> {
        self.lock().get(chat_id).cloned()
    }
}

fn input_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Tool grants that would have allowed `denials`, in order, without duplicates.
///
/// File tools are scoped to the denied path and `Bash` to the denied
/// command; anything else is granted by bare tool name.
pub fn allowed_tools_for(denials: &[PermissionDenial]) -> Vec<String> {
    let mut grants: Vec<String> = Vec::with_capacity(denials.len());
    for d in denials {
        let grant = match d.tool_name.as_str() {
            tool @ ("Write" | "Edit" | "Read") => {
                format!("{tool}:{}", input_str(&d.tool_input, "file_path").unwrap_or_default())
            }
            "Bash" => format!("Bash:{}", input_str(&d.tool_input, "command").unwrap_or_default()),
            other => other.to_string(),
        };
        if !grants.contains(&grant) {
            grants.push(grant);
        }
    }
    grants
}

/// One HTML bullet line describing a denial.
pub fn describe_denial(d: &PermissionDenial) -> String {
    let path = || escape_html(input_str(&d.tool_input, "file_path").unwrap_or("unknown"));
    match d.tool_name.as_str() {
        "Write" => format!("• <b>Write</b> to <code>{}</code>", path()),
        "Edit" => format!("• <b>Edit</b> <code>{}</code>", path()),
        "Read" => format!("• <b>Read</b> <code>{}</code>", path()),
        "Bash" => {
            let cmd = input_str(&d.tool_input, "command").unwrap_or("unknown");
            format!("• <b>Bash</b>: <code>{}</code>", escape_html(&truncate(cmd, 60)))
        }
        other => format!(
            "• <b>{}</b>: {}",
            escape_html(other),
            escape_html(&truncate(&d.tool_input.to_string(), 50))
        ),
    }
}
