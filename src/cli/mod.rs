//! Subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the logic lives here.

use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::config::Config;

/// Timeout for the short requests the helper subcommands make.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Base URL of a running relay: `CLAUDE_RELAY_URL`, else the local server port.
pub fn relay_url(cfg: &Config) -> String {
    relay_url_from(std::env::var("CLAUDE_RELAY_URL").ok(), cfg.server.port)
}

fn relay_url_from(explicit: Option<String>, port: u16) -> String {
    explicit
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("http://127.0.0.1:{port}"))
}

// ── Notify ──────────────────────────────────────────────────────────────────

/// Forward a Claude CLI hook event to the running relay.
///
/// Intended for the CLI's hook configuration, e.g.
/// `claude-relay notify completed`.  Fails when the relay is unreachable so
/// the hook reports the problem.
pub async fn notify_hook(base_url: &str, event: &str) -> anyhow::Result<()> {
    let url = format!("{base_url}/notify/{event}");
    debug!(%url, "posting hook event");

    let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;
    let resp = client
        .post(&url)
        .send()
        .await
        .with_context(|| format!("relay not reachable at {base_url}"))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("relay rejected notification ({status}): {body}");
    }
    Ok(())
}

// ── Status ──────────────────────────────────────────────────────────────────

/// Query `GET /health` on a running relay and print a summary.
pub async fn check_status(base_url: &str) -> anyhow::Result<()> {
    let url = format!("{base_url}/health");

    let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            println!("✅ claude-relay is running");
            println!("   Server:   {base_url}");
            if let Some(session) = body.get("current_session").and_then(|s| s.as_str()) {
                println!("   Session:  {session}");
            }
            if let Some(running) = body.get("claude_running").and_then(|v| v.as_bool()) {
                println!("   Claude:   {}", if running { "running" } else { "idle" });
            }
            if let Some(conv) = body.get("in_conversation").and_then(|v| v.as_bool()) {
                println!(
                    "   Mode:     {}",
                    if conv { "in conversation" } else { "new session" }
                );
            }
            if let Some(n) = body.get("active_sessions").and_then(|v| v.as_u64()) {
                println!("   Sessions: {n}");
            }
            Ok(())
        }
        Ok(resp) => {
            println!("⚠️  claude-relay responded with status: {}", resp.status());
            Ok(())
        }
        Err(_) => {
            println!("❌ claude-relay is not running (no response at {base_url})");
            println!("   Start it with: claude-relay serve");
            Ok(())
        }
    }
}
