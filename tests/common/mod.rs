//! Shared fixtures: a scriptable fake `claude` executable, a recording
//! chat transport and a bridge wired to both.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use claude_relay::bridge::{Bridge, BridgeSettings};
use claude_relay::chat::{ChatTransport, Keyboard, MessageId, ParseMode};
use claude_relay::claude::{ClaudeRunner, SessionResolver};
use claude_relay::session::SessionRegistry;
use tempfile::TempDir;

pub const CHAT_ID: &str = "4242";

/// Bind to port 0 to let the OS pick a free port, then release it.
pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

// ── Fake CLI ─────────────────────────────────────────────────

/// A shell script standing in for `claude`.  Every invocation appends its
/// arguments (one per line) followed by a `---` separator to `args.log`.
pub struct FakeCli {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl FakeCli {
    /// `body` runs after the arguments are logged; it sees them as `$@`.
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claude");
        let log = dir.path().join("args.log");
        let script = format!(
            "#!/bin/sh\nfor a in \"$@\"; do printf '%s\\n' \"$a\" >> '{}'; done\necho '---' >> '{}'\n{body}\n",
            log.display(),
            log.display(),
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    /// Emit a single successful result record.
    pub fn answering(text: &str, session_id: &str) -> Self {
        let record = serde_json::json!({
            "type": "result",
            "result": text,
            "session_id": session_id,
        });
        Self::new(&format!("cat <<'EOF'\n{record}\nEOF"))
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Arguments of every invocation so far, oldest first.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        let log = std::fs::read_to_string(self.dir.path().join("args.log")).unwrap_or_default();
        let mut calls = Vec::new();
        let mut current = Vec::new();
        for line in log.lines() {
            if line == "---" {
                calls.push(std::mem::take(&mut current));
            } else {
                current.push(line.to_string());
            }
        }
        calls
    }
}

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

// ── Claude home fixture ──────────────────────────────────────

/// Write `<projects>/<encoded dir>/<session_id>.jsonl` with the given lines.
pub fn write_session_log(projects: &Path, working_dir: &Path, session_id: &str, lines: &[String]) -> PathBuf {
    let abs = std::fs::canonicalize(working_dir).unwrap_or_else(|_| working_dir.to_path_buf());
    let project = projects.join(claude_relay::claude::resolver::encode_project_path(&abs));
    std::fs::create_dir_all(&project).unwrap();
    let log = project.join(format!("{session_id}.jsonl"));
    std::fs::write(&log, lines.join("\n")).unwrap();
    log
}

pub fn user_line(text: &str) -> String {
    serde_json::json!({ "type": "user", "message": { "role": "user", "content": text } }).to_string()
}

// ── Recording transport ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message {
        id: MessageId,
        chat_id: String,
        text: String,
        mode: ParseMode,
        keyboard: Option<Keyboard>,
    },
    Edit {
        id: MessageId,
        text: String,
    },
    Delete {
        id: MessageId,
    },
    Answer {
        callback_id: String,
    },
}

/// In-memory [`ChatTransport`] that records every call.
#[derive(Default)]
pub struct RecordingTransport {
    next_id: AtomicI64,
    log: Mutex<Vec<Sent>>,
    /// When set, HTML sends fail so the plain-text fallback is exercised.
    pub reject_html: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_html() -> Self {
        Self {
            reject_html: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Sent> {
        self.log.lock().unwrap().clone()
    }

    /// Texts of sent messages, in order.
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Sent::Message { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_message(&self) -> Option<Sent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Sent::Message { .. }))
            .last()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        mode: ParseMode,
        keyboard: Option<&Keyboard>,
    ) -> anyhow::Result<MessageId> {
        if self.reject_html && mode == ParseMode::Html {
            anyhow::bail!("can't parse entities");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(Sent::Message {
            id,
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            mode,
            keyboard: keyboard.cloned(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        _chat_id: &str,
        message_id: MessageId,
        text: &str,
        _mode: ParseMode,
    ) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Sent::Edit {
            id: message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, _chat_id: &str, message_id: MessageId) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Sent::Delete { id: message_id });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(Sent::Answer {
            callback_id: callback_id.to_string(),
        });
        Ok(())
    }
}

// ── Bridge harness ───────────────────────────────────────────

pub struct Harness {
    pub bridge: Arc<Bridge>,
    pub transport: Arc<RecordingTransport>,
    pub registry: Arc<SessionRegistry>,
    pub cli: FakeCli,
    /// Doubles as `$HOME` and default working directory.
    pub home: TempDir,
    /// Stand-in for `~/.claude/projects`.
    pub projects: TempDir,
}

impl Harness {
    pub fn new(cli: FakeCli) -> Self {
        Self::with_transport(cli, RecordingTransport::new())
    }

    pub fn with_transport(cli: FakeCli, transport: RecordingTransport) -> Self {
        let home = TempDir::new().unwrap();
        let projects = TempDir::new().unwrap();
        let home_path = std::fs::canonicalize(home.path()).unwrap();

        let registry = Arc::new(SessionRegistry::new(
            home_path.clone(),
            home_path,
            Duration::from_secs(600),
        ));
        let runner = ClaudeRunner::new(cli.path_str(), SessionResolver::new(projects.path()));
        let transport = Arc::new(transport);
        let settings = BridgeSettings {
            chat_id: CHAT_ID.to_string(),
            chunk_size: 4000,
            status_interval: Duration::from_millis(20),
            chunk_delay: Duration::from_millis(1),
        };
        let bridge = Arc::new(Bridge::new(
            transport.clone(),
            registry.clone(),
            runner,
            settings,
        ));
        Self {
            bridge,
            transport,
            registry,
            cli,
            home,
            projects,
        }
    }

    pub async fn say(&self, text: &str) {
        self.bridge.handle_message(CHAT_ID, text).await;
    }

    pub async fn press(&self, data: &str) {
        use claude_relay::chat::{Inbound, InboundHandler};
        self.bridge
            .handle(Inbound::Callback {
                id: "cb-1".to_string(),
                chat_id: CHAT_ID.to_string(),
                data: data.to_string(),
            })
            .await;
    }

    /// Create `<home>/<name>` and return its canonical path.
    pub fn subdir(&self, name: &str) -> PathBuf {
        let p = self.home.path().join(name);
        std::fs::create_dir_all(&p).unwrap();
        std::fs::canonicalize(p).unwrap()
    }
}
