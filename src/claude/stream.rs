//! Event-stream parser for `claude --output-format stream-json`.
//!
//! The CLI writes one JSON record per line.  [`StreamParser`] folds those
//! lines into an [`InvocationResult`] while forwarding assistant text
//! fragments to an optional live subscriber.  Lines that are not valid
//! records (diagnostics on the merged stderr, partial writes) are logged
//! and skipped.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

// ── Records ──────────────────────────────────────────────────

/// One line of CLI output, discriminated by its `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    /// Incremental assistant output.
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },
    /// Terminal record carrying the final answer.
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        permission_denials: Vec<PermissionDenial>,
    },
    /// Init / housekeeping records; some carry the session id early.
    System {
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

/// A tool call the CLI refused under the current grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDenial {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_use_id: String,
}

/// Outcome of a single CLI invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationResult {
    /// Final response text; empty when none was produced.
    pub text: String,
    /// Ordered denials; empty means no approval is needed.
    pub permission_denials: Vec<PermissionDenial>,
    /// Session id to store back on the session.
    pub session_id: Option<String>,
    /// Whether a terminal `result` record was seen.  `false` means the
    /// process exited (or crashed) without one.
    pub completed: bool,
}

// ── Parser ───────────────────────────────────────────────────

/// Folds output lines into an [`InvocationResult`].
#[derive(Debug, Default)]
pub struct StreamParser {
    result: InvocationResult,
    system_session_id: Option<String>,
    partial_tx: Option<mpsc::UnboundedSender<String>>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every assistant text fragment to `tx` as it is parsed.
    pub fn with_partial_text(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.partial_tx = Some(tx);
        self
    }

    /// Consume one line of output.
    pub fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let record: StreamRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, line = %truncate_for_log(line), "skipping non-record output line");
                return;
            }
        };

        match record {
            StreamRecord::Assistant { message } => {
                for block in message.content {
                    if let ContentBlock::Text { text } = block {
                        if text.is_empty() {
                            continue;
                        }
                        if let Some(tx) = &self.partial_tx {
                            // Subscriber may have gone away; parsing continues regardless.
                            let _ = tx.send(text);
                        }
                    }
                }
            }
            StreamRecord::Result {
                result,
                session_id,
                permission_denials,
            } => {
                self.result.text = result.unwrap_or_default();
                self.result.permission_denials = permission_denials;
                if session_id.is_some() {
                    self.result.session_id = session_id;
                }
                self.result.completed = true;
            }
            StreamRecord::System { session_id } => {
                if session_id.is_some() {
                    self.system_session_id = session_id;
                }
            }
            StreamRecord::Other => {}
        }
    }

    /// Finish parsing. The session id falls back to the one announced by a
    /// `system` record when the terminal record carried none.
    pub fn finish(self) -> InvocationResult {
        let mut result = self.result;
        if result.session_id.is_none() {
            result.session_id = self.system_session_id;
        }
        result
    }
}

/// Drain `lines` into a result, forwarding text fragments to `partial`.
pub async fn parse_stream<S>(
    mut lines: S,
    partial: Option<mpsc::UnboundedSender<String>>,
) -> InvocationResult
where
    S: Stream<Item = String> + Unpin,
{
    let mut parser = StreamParser::new();
    if let Some(tx) = partial {
        parser = parser.with_partial_text(tx);
    }
    while let Some(line) = lines.next().await {
        parser.feed(&line);
    }
    parser.finish()
}

fn truncate_for_log(line: &str) -> String {
    const MAX: usize = 200;
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let head: String = line.chars().take(MAX).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSISTANT: &str =
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Working on it"},{"type":"tool_use","id":"t1","name":"Bash","input":{}}]}}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","result":"All done","session_id":"abc-123","permission_denials":[]}"#;

    fn parse_lines(lines: &[&str]) -> InvocationResult {
        let mut p = StreamParser::new();
        for l in lines {
            p.feed(l);
        }
        p.finish()
    }

    #[test]
    fn result_record_is_authoritative() {
        let r = parse_lines(&[ASSISTANT, RESULT]);
        assert_eq!(r.text, "All done");
        assert_eq!(r.session_id.as_deref(), Some("abc-123"));
        assert!(r.permission_denials.is_empty());
        assert!(r.completed);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let r = parse_lines(&["Warning: something on stderr", "", "{not json", RESULT]);
        assert_eq!(r.text, "All done");
    }

    #[test]
    fn missing_result_yields_empty_incomplete_result() {
        let r = parse_lines(&[ASSISTANT, "Segmentation fault"]);
        assert_eq!(r.text, "");
        assert!(r.permission_denials.is_empty());
        assert_eq!(r.session_id, None);
        assert!(!r.completed);
    }

    #[test]
    fn last_result_wins() {
        let second = r#"{"type":"result","result":"second","session_id":"s2"}"#;
        let r = parse_lines(&[RESULT, second]);
        assert_eq!(r.text, "second");
        assert_eq!(r.session_id.as_deref(), Some("s2"));
    }

    #[test]
    fn system_session_id_is_fallback() {
        let system = r#"{"type":"system","subtype":"init","session_id":"from-init"}"#;
        let result = r#"{"type":"result","result":"ok"}"#;
        let r = parse_lines(&[system, result]);
        assert_eq!(r.session_id.as_deref(), Some("from-init"));
    }

    #[test]
    fn denials_are_parsed_in_order() {
        let line = r#"{"type":"result","result":"","session_id":"s","permission_denials":[
            {"tool_name":"Write","tool_input":{"file_path":"/tmp/x.txt"},"tool_use_id":"u1"},
            {"tool_name":"Bash","tool_input":{"command":"rm -rf build"},"tool_use_id":"u2"}]}"#
            .replace('\n', "");
        let r = parse_lines(&[&line]);
        assert_eq!(r.permission_denials.len(), 2);
        assert_eq!(r.permission_denials[0].tool_name, "Write");
        assert_eq!(r.permission_denials[0].tool_input["file_path"], "/tmp/x.txt");
        assert_eq!(r.permission_denials[1].tool_use_id, "u2");
    }

    #[test]
    fn parsing_is_repeatable() {
        let lines = [ASSISTANT, "noise", RESULT];
        assert_eq!(parse_lines(&lines), parse_lines(&lines));
    }

    #[tokio::test]
    async fn partial_text_is_forwarded_live() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lines = tokio_stream::iter(vec![ASSISTANT.to_string(), RESULT.to_string()]);
        let r = parse_stream(lines, Some(tx)).await;
        assert_eq!(r.text, "All done");
        assert_eq!(rx.recv().await.as_deref(), Some("Working on it"));
        assert!(rx.recv().await.is_none());
    }
}
