//! Public URL for the local webhook endpoint.
//!
//! The default provider runs a cloudflared quick tunnel and scrapes the
//! assigned `*.trycloudflare.com` hostname from its log output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::process::{terminate_gracefully, TERMINATE_GRACE};

static TUNNEL_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com")
        .unwrap_or_else(|e| panic!("tunnel url pattern: {e}"))
});

/// How long to wait for cloudflared to report its hostname.
pub const URL_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can expose a local port on a public HTTPS URL.
#[async_trait]
pub trait PublicUrlProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Whether the provider can run on this machine at all.
    fn is_available(&self) -> bool;
    /// Expose `port`; returns the public base URL.
    async fn start(&mut self, port: u16) -> anyhow::Result<String>;
    /// Tear the tunnel down.  Safe to call when never started.
    async fn stop(&mut self);
}

pub struct CloudflaredTunnel {
    binary: String,
    url_timeout: Duration,
    child: Option<Child>,
}

impl CloudflaredTunnel {
    pub fn new() -> Self {
        Self {
            binary: "cloudflared".to_string(),
            url_timeout: URL_TIMEOUT,
            child: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_url_timeout(mut self, timeout: Duration) -> Self {
        self.url_timeout = timeout;
        self
    }
}

impl Default for CloudflaredTunnel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublicUrlProvider for CloudflaredTunnel {
    fn name(&self) -> &str {
        "cloudflared"
    }

    fn is_available(&self) -> bool {
        find_executable(&self.binary).is_some()
    }

    async fn start(&mut self, port: u16) -> anyhow::Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["tunnel", "--url", &format!("http://localhost:{port}")])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.binary))?;

        // cloudflared logs to stderr, but scan both.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(out) = child.stdout.take() {
            forward_lines(out, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, tx);
        }

        let found = tokio::time::timeout(self.url_timeout, async {
            while let Some(line) = rx.recv().await {
                debug!(target: "cloudflared", "{line}");
                if let Some(url) = extract_tunnel_url(&line) {
                    return Some(url);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(url)) => {
                info!(%url, port, "tunnel established");
                // Keep draining so cloudflared never blocks on a full pipe.
                tokio::spawn(async move { while rx.recv().await.is_some() {} });
                self.child = Some(child);
                Ok(url)
            }
            Ok(None) => {
                let _ = terminate_gracefully(&mut child, TERMINATE_GRACE).await;
                anyhow::bail!("cloudflared exited before reporting a URL")
            }
            Err(_) => {
                let _ = terminate_gracefully(&mut child, TERMINATE_GRACE).await;
                anyhow::bail!(
                    "cloudflared did not report a URL within {}s",
                    self.url_timeout.as_secs()
                )
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match terminate_gracefully(&mut child, TERMINATE_GRACE).await {
                Ok(status) => info!(?status, "tunnel stopped"),
                Err(e) => warn!(error = %e, "failed to stop tunnel"),
            }
        }
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// First quick-tunnel URL in a cloudflared log line.
pub fn extract_tunnel_url(line: &str) -> Option<String> {
    TUNNEL_URL.find(line).map(|m| m.as_str().to_string())
}

/// Resolve `name` the way a shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
