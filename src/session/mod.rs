//! Per-directory sessions and the registry that owns them.
//!
//! A [`Session`] ties one working directory to at most one in-flight CLI
//! process plus the state needed to resume its conversation.  The
//! [`SessionRegistry`] is the single owner of all sessions and of the
//! "current directory" selection; handlers receive it by reference and
//! never keep session state of their own.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::claude::InvokeError;

/// Words that continue a conversation regardless of the idle timeout.
const QUICK_REPLIES: &[&str] = &["yes", "no", "y", "n", "ok", "cancel", "skip", "done", "next"];

// ── Conversation state ───────────────────────────────────────

/// Whether the next message continues the conversation or starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Fresh,
    Continuing,
}

impl ConversationState {
    /// `Continuing` iff the last interaction happened less than `timeout` before `now`.
    pub fn at(last_interaction: Option<DateTime<Utc>>, now: DateTime<Utc>, timeout: Duration) -> Self {
        let Some(last) = last_interaction else {
            return ConversationState::Fresh;
        };
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        if now.signed_duration_since(last) < timeout {
            ConversationState::Continuing
        } else {
            ConversationState::Fresh
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConversationState::Fresh => "fresh",
            ConversationState::Continuing => "in conversation",
        }
    }
}

/// A bare number or one of a few control words ("yes", "ok", "skip"...).
pub fn is_quick_reply(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    QUICK_REPLIES.contains(&text.as_str())
}

/// Continue intent for an inbound message.
pub fn should_continue(state: ConversationState, text: &str) -> bool {
    state == ConversationState::Continuing || is_quick_reply(text)
}

// ── Session ──────────────────────────────────────────────────

#[derive(Debug)]
struct ProcessSlot {
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
struct SessionState {
    process: Option<ProcessSlot>,
    session_id: Option<String>,
    last_interaction: Option<DateTime<Utc>>,
    context_shown: bool,
}

/// Conversation state for one working directory.
#[derive(Debug)]
pub struct Session {
    /// Short registry-assigned id, stable for the session's lifetime.
    key: u64,
    working_dir: PathBuf,
    is_default: bool,
    timeout: Duration,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            key: 0,
            working_dir: working_dir.into(),
            is_default: false,
            timeout,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    /// Display name: `default` for the registry's default directory,
    /// otherwise the directory's final component.
    pub fn short_name(&self) -> String {
        if self.is_default {
            return "default".to_string();
        }
        self.working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.working_dir.display().to_string())
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_running(&self) -> bool {
        self.state().process.is_some()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state().session_id.clone()
    }

    pub fn set_session_id(&self, id: impl Into<String>) {
        self.state().session_id = Some(id.into());
    }

    pub fn last_interaction(&self) -> Option<DateTime<Utc>> {
        self.state().last_interaction
    }

    pub fn conversation_state_at(&self, now: DateTime<Utc>) -> ConversationState {
        ConversationState::at(self.last_interaction(), now, self.timeout)
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.conversation_state_at(Utc::now())
    }

    /// Forget the idle timer so the next message starts a fresh conversation.
    pub fn reset_conversation(&self) {
        self.state().last_interaction = None;
    }

    pub fn context_shown(&self) -> bool {
        self.state().context_shown
    }

    pub fn mark_context_shown(&self) {
        self.state().context_shown = true;
    }

    /// Record the end of an invocation.
    pub fn finish_invocation(&self, session_id: Option<String>, at: DateTime<Utc>) {
        let mut state = self.state();
        if let Some(id) = session_id {
            state.session_id = Some(id);
        }
        state.last_interaction = Some(at);
        state.context_shown = true;
    }

    /// Claim the process slot.  Fails with [`InvokeError::Busy`] when a
    /// process is already in flight; the slot is released when the
    /// returned guard is dropped.
    pub fn try_begin(self: &Arc<Self>) -> Result<ProcessGuard, InvokeError> {
        let mut state = self.state();
        if state.process.is_some() {
            return Err(InvokeError::Busy(self.short_name()));
        }
        let cancel = CancellationToken::new();
        let (finished_tx, finished_rx) = watch::channel(false);
        state.process = Some(ProcessSlot {
            cancel: cancel.clone(),
            finished: finished_rx,
        });
        Ok(ProcessGuard {
            session: Arc::clone(self),
            cancel,
            finished: finished_tx,
        })
    }

    /// Stop the in-flight process and wait for the slot to clear.
    /// Returns `false` when nothing was running.
    pub async fn cancel(&self) -> bool {
        let (token, mut finished) = {
            let state = self.state();
            match &state.process {
                Some(slot) => (slot.cancel.clone(), slot.finished.clone()),
                None => return false,
            }
        };
        info!(dir = %self.working_dir.display(), "cancelling claude process");
        token.cancel();
        // The sender is dropped with the guard, which also counts as finished.
        let _ = finished.wait_for(|done| *done).await;
        true
    }
}

/// Exclusive claim on a session's process slot.
#[derive(Debug)]
pub struct ProcessGuard {
    session: Arc<Session>,
    cancel: CancellationToken,
    finished: watch::Sender<bool>,
}

impl ProcessGuard {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Token the runner watches to know it must stop the child.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.session.state().process = None;
        let _ = self.finished.send(true);
    }
}

// ── Registry ─────────────────────────────────────────────────

/// Why a session could not be removed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RemoveError {
    #[error("session {0} is running; cancel it first")]
    Running(String),
    #[error("no session for {0}")]
    NotFound(String),
}

#[derive(Debug)]
struct RegistryState {
    sessions: BTreeMap<PathBuf, Arc<Session>>,
    current: PathBuf,
    next_key: u64,
}

/// Owner of every [`Session`], keyed by absolute working directory.
#[derive(Debug)]
pub struct SessionRegistry {
    default_dir: PathBuf,
    home: PathBuf,
    timeout: Duration,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    /// `default_dir` is current until something else is selected; relative
    /// inputs to [`switch_to`](Self::switch_to) resolve against `home`.
    pub fn new(default_dir: impl Into<PathBuf>, home: impl Into<PathBuf>, timeout: Duration) -> Self {
        let default_dir = default_dir.into();
        Self {
            state: Mutex::new(RegistryState {
                sessions: BTreeMap::new(),
                current: default_dir.clone(),
                next_key: 0,
            }),
            default_dir,
            home: home.into(),
            timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    /// Look up the session for `dir`, creating it on first use.
    pub fn get_or_create(&self, dir: &Path) -> Arc<Session> {
        let mut state = self.state();
        self.get_or_create_locked(&mut state, dir)
    }

    fn get_or_create_locked(&self, state: &mut RegistryState, dir: &Path) -> Arc<Session> {
        if let Some(existing) = state.sessions.get(dir) {
            return Arc::clone(existing);
        }
        state.next_key += 1;
        let session = Arc::new(Session {
            key: state.next_key,
            working_dir: dir.to_path_buf(),
            is_default: dir == self.default_dir,
            timeout: self.timeout,
            state: Mutex::new(SessionState::default()),
        });
        state.sessions.insert(dir.to_path_buf(), Arc::clone(&session));
        info!(dir = %dir.display(), "session created");
        session
    }

    pub fn current_dir(&self) -> PathBuf {
        self.state().current.clone()
    }

    /// The session for the current directory.
    pub fn current(&self) -> Arc<Session> {
        let mut state = self.state();
        let dir = state.current.clone();
        self.get_or_create_locked(&mut state, &dir)
    }

    /// Make `input` the current directory and return its session.
    pub fn switch_to(&self, input: &str) -> Arc<Session> {
        let dir = self.normalize(input);
        let mut state = self.state();
        state.current = dir.clone();
        debug!(dir = %dir.display(), "switched current session");
        self.get_or_create_locked(&mut state, &dir)
    }

    /// Make the session with `key` current.  `None` when it has been removed.
    pub fn switch_to_key(&self, key: u64) -> Option<Arc<Session>> {
        let mut state = self.state();
        let session = state.sessions.values().find(|s| s.key == key).cloned()?;
        state.current = session.working_dir.clone();
        debug!(dir = %state.current.display(), key, "switched current session");
        Some(session)
    }

    /// Resolve user input to an absolute directory.
    ///
    /// Paths not starting with `/` or `~` are taken relative to home.
    /// Existing paths are canonicalized; others are normalized lexically.
    pub fn normalize(&self, input: &str) -> PathBuf {
        let input = input.trim();
        let raw = if input.starts_with('/') {
            PathBuf::from(input)
        } else if input == "~" {
            self.home.clone()
        } else if let Some(rest) = input.strip_prefix("~/") {
            self.home.join(rest)
        } else {
            self.home.join(input.trim_start_matches('~'))
        };
        std::fs::canonicalize(&raw).unwrap_or_else(|_| lexical_normalize(&raw))
    }

    /// Remove the session for `dir`.  Running sessions are refused.  When
    /// the current session goes away, the first remaining session (or the
    /// default directory) becomes current.
    pub fn remove(&self, dir: &Path) -> Result<Arc<Session>, RemoveError> {
        let mut state = self.state();
        let Some(session) = state.sessions.get(dir) else {
            return Err(RemoveError::NotFound(dir.display().to_string()));
        };
        if session.is_running() {
            return Err(RemoveError::Running(session.short_name()));
        }
        let removed = state
            .sessions
            .remove(dir)
            .ok_or_else(|| RemoveError::NotFound(dir.display().to_string()))?;

        if state.current == dir {
            state.current = state
                .sessions
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| self.default_dir.clone());
            debug!(current = %state.current.display(), "current session removed, fell back");
        }
        info!(dir = %dir.display(), "session removed");
        Ok(removed)
    }

    /// All sessions in directory order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.state().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn any_running(&self) -> bool {
        self.state().sessions.values().any(|s| s.is_running())
    }

    pub fn running_session(&self) -> Option<Arc<Session>> {
        self.state().sessions.values().find(|s| s.is_running()).cloned()
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MIN: Duration = Duration::from_secs(600);

    #[test]
    fn timeout_boundary() {
        let last = Utc::now();
        let just_inside = last + chrono::Duration::seconds(9 * 60 + 59);
        let just_outside = last + chrono::Duration::seconds(10 * 60 + 1);
        assert_eq!(ConversationState::at(Some(last), just_inside, TEN_MIN), ConversationState::Continuing);
        assert_eq!(ConversationState::at(Some(last), just_outside, TEN_MIN), ConversationState::Fresh);
        assert_eq!(ConversationState::at(None, last, TEN_MIN), ConversationState::Fresh);
    }

    #[test]
    fn quick_replies() {
        for yes in ["1", "42", "yes", "n", "ok", " OK ", "Skip"] {
            assert!(is_quick_reply(yes), "{yes:?} should be a quick reply");
        }
        for no in ["hello", "1.5", "", "-1", "yes please"] {
            assert!(!is_quick_reply(no), "{no:?} should not be a quick reply");
        }
    }

    #[test]
    fn quick_reply_forces_continue() {
        assert!(should_continue(ConversationState::Fresh, "2"));
        assert!(!should_continue(ConversationState::Fresh, "do something"));
        assert!(should_continue(ConversationState::Continuing, "do something"));
    }

    #[test]
    fn second_begin_is_busy_until_guard_drops() {
        let session = Arc::new(Session::new("/tmp/proj", TEN_MIN));
        let guard = session.try_begin().unwrap();
        assert!(session.is_running());
        assert!(matches!(session.try_begin(), Err(InvokeError::Busy(_))));
        drop(guard);
        assert!(!session.is_running());
        assert!(session.try_begin().is_ok());
    }

    #[tokio::test]
    async fn cancel_when_idle_reports_nothing() {
        let session = Session::new("/tmp/proj", TEN_MIN);
        assert!(!session.cancel().await);
    }

    #[tokio::test]
    async fn cancel_signals_token_and_waits_for_release() {
        let session = Arc::new(Session::new("/tmp/proj", TEN_MIN));
        let guard = session.try_begin().unwrap();
        let token = guard.cancellation();
        let worker = tokio::spawn(async move {
            token.cancelled().await;
            drop(guard);
        });
        assert!(session.cancel().await);
        assert!(!session.is_running());
        worker.await.unwrap();
    }

    #[test]
    fn finish_invocation_keeps_known_id_when_none_reported() {
        let session = Session::new("/tmp/proj", TEN_MIN);
        session.set_session_id("abc");
        session.finish_invocation(None, Utc::now());
        assert_eq!(session.session_id().as_deref(), Some("abc"));
        assert_eq!(session.conversation_state(), ConversationState::Continuing);
        session.reset_conversation();
        assert_eq!(session.conversation_state(), ConversationState::Fresh);
    }

    #[test]
    fn lexical_normalize_resolves_dots() {
        assert_eq!(lexical_normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
    }
}
