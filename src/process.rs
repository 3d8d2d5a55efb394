//! Child-process shutdown shared by the CLI runner and the tunnel.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// How long a child gets to exit after SIGTERM before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Ask `child` to exit, wait up to `grace`, then force-kill it.
///
/// Returns the exit status once the child is gone.  A child that already
/// exited is simply reaped.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    send_sigterm(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            debug!(?status, "child exited after terminate");
            status
        }
        Err(_) => {
            warn!(pid = ?child.id(), grace_secs = grace.as_secs(), "child ignored terminate, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` belongs to a child we own and have not reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn terminates_a_sleeping_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let started = std::time::Instant::now();
        let status = terminate_gracefully(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn kills_a_child_that_ignores_sigterm() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .spawn()
            .unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = terminate_gracefully(&mut child, Duration::from_millis(300)).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn reaps_an_already_exited_child() {
        let mut child = Command::new("true").spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = terminate_gracefully(&mut child, Duration::from_secs(1)).await.unwrap();
        assert!(status.success());
    }
}
