//! Launch the CLI for one prompt and stream its output into the parser.
//!
//! stdout and stderr are read by two tasks feeding a single line channel,
//! so diagnostics interleave with records exactly as a merged stream
//! would.  The parser consumes that channel as a stream.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::command::{build_args, choose_resumption, InvocationRequest};
use super::resolver::SessionResolver;
use super::stream::{parse_stream, InvocationResult};
use super::InvokeError;
use crate::process::{terminate_gracefully, TERMINATE_GRACE};
use crate::session::ProcessGuard;

/// How long output readers may linger after the child has exited (a
/// grandchild can keep the pipes open).
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    cli_path: String,
    resolver: SessionResolver,
}

impl ClaudeRunner {
    pub fn new(cli_path: impl Into<String>, resolver: SessionResolver) -> Self {
        Self {
            cli_path: cli_path.into(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    /// Run one prompt inside the session held by `guard`.
    ///
    /// Assistant text fragments are sent to `partial` while the process
    /// runs.  Cancelling the guard's token terminates the child; whatever
    /// was parsed up to that point is returned.  Only a failed launch is an
    /// error; crashes and garbage output yield an empty or partial result.
    pub async fn run(
        &self,
        guard: &ProcessGuard,
        request: InvocationRequest,
        partial: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<InvocationResult, InvokeError> {
        let dir = request.working_dir.clone();
        let resumption = choose_resumption(&request, || self.resolver.latest_session_id(&dir));
        let args = build_args(&request.prompt, &resumption, &request.allowed_tools);

        info!(
            cli = %self.cli_path,
            dir = %dir.display(),
            resumption = ?resumption,
            allowed_tools = request.allowed_tools.len(),
            "launching claude"
        );

        let mut child = Command::new(&self.cli_path)
            .args(&args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                cli: self.cli_path.clone(),
                source,
            })?;

        let (line_tx, line_rx) = mpsc::channel::<String>(256);
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_line_reader(out, line_tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_line_reader(err, line_tx.clone()));
        }
        drop(line_tx);

        let parser = tokio::spawn(parse_stream(ReceiverStream::new(line_rx), partial));

        let cancel = guard.cancellation();
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let status = match exited {
            Some(status) => status,
            None => terminate_gracefully(&mut child, TERMINATE_GRACE).await,
        };
        match &status {
            Ok(s) => debug!(status = ?s, "claude exited"),
            Err(e) => warn!(error = %e, "failed to wait for claude"),
        }

        let drain = join_readers(&mut readers);
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("output pipes still open after exit, abandoning readers");
            for r in &readers {
                r.abort();
            }
        }

        let mut result = parser.await.unwrap_or_else(|e| {
            warn!(error = %e, "stream parser task failed");
            InvocationResult::default()
        });

        if !result.completed {
            warn!(dir = %dir.display(), cancelled = cancel.is_cancelled(), "claude produced no result record");
        }
        if result.session_id.is_none() {
            result.session_id = self.resolver.latest_session_id(&dir);
        }

        guard
            .session()
            .finish_invocation(result.session_id.clone(), Utc::now());
        if let Some(id) = &result.session_id {
            debug!(dir = %dir.display(), session_id = %id, "session id recorded");
        }

        Ok(result)
    }
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "output read error");
                    break;
                }
            }
        }
    })
}

async fn join_readers(readers: &mut [JoinHandle<()>]) {
    for r in readers.iter_mut() {
        let _ = r.await;
    }
}
