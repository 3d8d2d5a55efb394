//! Command-line construction for a single CLI invocation.

use std::path::PathBuf;

/// How an invocation attaches to prior conversation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption {
    /// `--resume <id>`
    Resume(String),
    /// `--continue`: the CLI's most recent conversation, whatever its id.
    Continue,
    /// No flag.
    Fresh,
}

/// Everything needed to launch the CLI once.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    /// Caller wants to continue the existing conversation.
    pub continue_conversation: bool,
    /// Session id already known for this directory.
    pub session_id: Option<String>,
    /// Extra tool grants passed as `--allowedTools`.
    pub allowed_tools: Vec<String>,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            continue_conversation: false,
            session_id: None,
            allowed_tools: Vec::new(),
        }
    }

    pub fn continuing(mut self, yes: bool) -> Self {
        self.continue_conversation = yes;
        self
    }

    pub fn with_session_id(mut self, id: Option<String>) -> Self {
        self.session_id = id;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }
}

/// Pick the resumption flag.
///
/// Without continue intent the conversation starts fresh.  With it, the
/// first available of: the known session id, the newest on-disk session
/// for the directory (`lookup` is only called when needed), or the CLI's
/// generic `--continue`.
pub fn choose_resumption<F>(request: &InvocationRequest, lookup: F) -> Resumption
where
    F: FnOnce() -> Option<String>,
{
    if !request.continue_conversation {
        return Resumption::Fresh;
    }
    if let Some(id) = request.session_id.as_ref().filter(|id| !id.is_empty()) {
        return Resumption::Resume(id.clone());
    }
    match lookup() {
        Some(id) => Resumption::Resume(id),
        None => Resumption::Continue,
    }
}

/// Arguments following the executable name.  The prompt is always last.
pub fn build_args(prompt: &str, resumption: &Resumption, allowed_tools: &[String]) -> Vec<String> {
    let mut args: Vec<String> = ["--print", "--output-format", "stream-json", "--verbose"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if !allowed_tools.is_empty() {
        args.push("--allowedTools".into());
        args.push(allowed_tools.join(","));
    }

    match resumption {
        Resumption::Resume(id) => {
            args.push("--resume".into());
            args.push(id.clone());
        }
        Resumption::Continue => args.push("--continue".into()),
        Resumption::Fresh => {}
    }

    args.push(prompt.to_string());
    args
}
