use claude_relay::bridge::{Bridge, BridgeSettings};
use claude_relay::chat::InboundHandler;
use claude_relay::claude::{ClaudeRunner, SessionResolver};
use claude_relay::cli;
use claude_relay::config::{self, Config, Mode};
use claude_relay::gateway;
use claude_relay::session::SessionRegistry;
use claude_relay::telegram::{polling, TelegramClient};
use claude_relay::tunnel::{CloudflaredTunnel, PublicUrlProvider};

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// `setWebhook` attempts against a freshly created tunnel.
const WEBHOOK_ATTEMPTS: u32 = 3;
const WEBHOOK_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "claude-relay", version, about = "Drive Claude Code sessions from Telegram")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Forward a Claude CLI hook event to the running relay
    Notify {
        /// Event name, e.g. `completed` or `waiting`
        event: String,
    },
    /// Check whether the relay is running
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| claude_relay::relay_home().join("config.yaml"));

    match cli.command {
        Some(Command::Serve) | None => serve(&config_path).await,
        Some(Command::Notify { event }) => {
            let cfg = Config::load_unvalidated(&config_path).await?;
            cli::notify_hook(&cli::relay_url(&cfg), &event).await
        }
        Some(Command::Status) => {
            let cfg = Config::load_unvalidated(&config_path).await?;
            cli::check_status(&cli::relay_url(&cfg)).await
        }
    }
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    info!(path = %config_path.display(), "loading configuration");
    let cfg = Config::load(config_path).await?;

    let registry = Arc::new(SessionRegistry::new(
        cfg.claude.default_dir(),
        config::home_dir(),
        cfg.claude.conversation_timeout(),
    ));
    let runner = ClaudeRunner::new(
        cfg.claude.cli_path.clone(),
        SessionResolver::new(cfg.claude.projects_dir()),
    );
    let client = Arc::new(TelegramClient::from_config(&cfg)?);
    let bridge = Arc::new(Bridge::new(
        client.clone(),
        registry.clone(),
        runner,
        BridgeSettings::from_config(&cfg),
    ));

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;
    let webhook_secret = cfg.webhook_secret();
    let gw = gateway::start_gateway(
        addr,
        bridge.clone(),
        &cfg.server.webhook_path,
        webhook_secret.clone(),
    )
    .await
    .with_context(|| format!("failed to bind {addr}"))?;

    let cancel = CancellationToken::new();
    let mut tunnel = CloudflaredTunnel::new();
    let mut poller: Option<JoinHandle<()>> = None;
    let mut webhook_registered = false;

    let delivery = match cfg.mode {
        Mode::Tunnel => {
            match open_tunnel(
                &mut tunnel,
                &client,
                gw.addr.port(),
                &cfg.server.webhook_path,
                webhook_secret.as_deref(),
            )
            .await
            {
                Ok(url) => {
                    webhook_registered = true;
                    format!("webhook via {} ({url})", tunnel.name())
                }
                Err(e) => {
                    warn!(error = %e, "tunnel unavailable, falling back to polling");
                    tunnel.stop().await;
                    poller = Some(start_polling(&client, &bridge, &cancel).await);
                    "polling (tunnel fallback)".to_string()
                }
            }
        }
        Mode::Webhook => {
            let base = cfg
                .server
                .webhook_url
                .as_deref()
                .context("webhook mode requires server.webhook_url")?;
            let url = format!("{}{}", base.trim_end_matches('/'), cfg.server.webhook_path);
            client
                .set_webhook(&url, webhook_secret.as_deref())
                .await
                .context("failed to register webhook")?;
            webhook_registered = true;
            format!("webhook ({url})")
        }
        Mode::Polling => {
            poller = Some(start_polling(&client, &bridge, &cancel).await);
            "polling".to_string()
        }
    };

    info!(
        server = %gw.addr,
        delivery = %delivery,
        dir = %registry.default_dir().display(),
        "claude-relay ready"
    );
    println!();
    println!("  claude-relay v{}", env!("CARGO_PKG_VERSION"));
    println!("  Server:    http://{}", gw.addr);
    println!("  Updates:   {delivery}");
    println!("  Directory: {}", registry.default_dir().display());
    println!();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    cancel.cancel();
    if let Some(handle) = poller {
        let _ = handle.await;
    }
    if webhook_registered {
        if let Err(e) = client.delete_webhook().await {
            warn!(error = %e, "failed to delete webhook");
        }
    }
    tunnel.stop().await;
    gw.handle.abort();

    info!("claude-relay stopped");
    Ok(())
}

/// Expose the server publicly and point the bot's webhook at it.
async fn open_tunnel(
    tunnel: &mut dyn PublicUrlProvider,
    client: &TelegramClient,
    port: u16,
    webhook_path: &str,
    secret: Option<&str>,
) -> anyhow::Result<String> {
    if !tunnel.is_available() {
        anyhow::bail!("{} not found on PATH", tunnel.name());
    }
    let base = tunnel.start(port).await?;
    let url = format!("{base}{webhook_path}");
    client
        .set_webhook_with_retry(&url, secret, WEBHOOK_ATTEMPTS, WEBHOOK_RETRY_DELAY)
        .await
        .context("failed to register tunnel webhook")?;
    Ok(url)
}

async fn start_polling(
    client: &Arc<TelegramClient>,
    bridge: &Arc<Bridge>,
    cancel: &CancellationToken,
) -> JoinHandle<()> {
    // getUpdates is refused while a webhook is set.
    if let Err(e) = client.delete_webhook().await {
        warn!(error = %e, "failed to clear webhook before polling");
    }
    let handler: Arc<dyn InboundHandler> = bridge.clone();
    polling::spawn_polling(client.clone(), handler, cancel.clone())
}
