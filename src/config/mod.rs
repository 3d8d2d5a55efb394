use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

/// A reference to a secret value.
///
/// Supports two YAML forms:
///   - Plain string:  `token: $TELEGRAM_BOT_TOKEN` or a literal token
///   - Pointer object: `token: { key: "TELEGRAM_BOT_TOKEN", source: "env" }`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SecretRef {
    /// Literal value or `$VAR` environment reference.
    Plain(String),
    /// Structured pointer: key + source (only `"env"` is understood).
    Pointer { key: String, source: String },
}

impl SecretRef {
    /// Resolve the reference to its value. Returns `None` when the
    /// referenced variable is unset or the result is empty.
    pub fn resolve(&self) -> Option<String> {
        let value = match self {
            SecretRef::Plain(s) => match s.strip_prefix('$') {
                Some(var) if !var.is_empty() => std::env::var(var).ok()?,
                _ => s.clone(),
            },
            SecretRef::Pointer { key, source } => match source.as_str() {
                "env" => std::env::var(key).ok()?,
                other => {
                    tracing::warn!(source = %other, "unsupported secret source");
                    return None;
                }
            },
        };
        Some(value).filter(|v| !v.trim().is_empty())
    }
}

/// How updates reach the bridge.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Expose the server through a cloudflared quick tunnel and register it as the webhook.
    #[default]
    Tunnel,
    /// Long-poll `getUpdates`; no public URL needed.
    Polling,
    /// Register the manually configured `server.webhook_url`.
    Webhook,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tunnel" => Ok(Mode::Tunnel),
            "polling" => Ok(Mode::Polling),
            "webhook" => Ok(Mode::Webhook),
            other => anyhow::bail!("unknown mode '{other}' (expected tunnel, polling or webhook)"),
        }
    }
}

/// Top-level configuration loaded from `config.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Telegram bot settings.
    pub telegram: TelegramConfig,
    /// Claude CLI settings.
    pub claude: ClaudeConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Update delivery mode.
    pub mode: Mode,
    /// Response delivery tuning.
    pub bridge: BridgeConfig,
}

/// Telegram-specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelegramConfig {
    /// Bot token – plain string, env-var ref, or secret pointer.
    pub token: Option<SecretRef>,
    /// The only chat allowed to talk to the bot.
    #[serde(deserialize_with = "chat_id_from_yaml")]
    pub chat_id: Option<String>,
    /// Bot API base URL. Overridden in tests.
    pub api_base: String,
    /// Optional secret Telegram echoes back in `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: Option<SecretRef>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            webhook_secret: None,
        }
    }
}

/// Claude CLI settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClaudeConfig {
    /// Path or name of the `claude` executable.
    pub cli_path: String,
    /// Initial working directory. Defaults to the user's home directory.
    pub working_dir: Option<String>,
    /// Claude's own data directory (holds `projects/`). Defaults to `~/.claude`.
    pub home: Option<String>,
    /// Idle seconds after which the next message starts a fresh conversation.
    pub conversation_timeout_secs: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            working_dir: None,
            home: None,
            conversation_timeout_secs: 600,
        }
    }
}

impl ClaudeConfig {
    /// Claude's data directory.
    pub fn claude_home(&self) -> PathBuf {
        match &self.home {
            Some(h) => expand_home(h),
            None => home_dir().join(".claude"),
        }
    }

    /// Directory holding one sub-directory of conversation logs per project.
    pub fn projects_dir(&self) -> PathBuf {
        self.claude_home().join("projects")
    }

    /// Directory used when no session has been selected yet.
    pub fn default_dir(&self) -> PathBuf {
        match &self.working_dir {
            Some(d) => expand_home(d),
            None => home_dir(),
        }
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation_timeout_secs)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path Telegram posts updates to.
    pub webhook_path: String,
    /// Public base URL used in `webhook` mode.
    pub webhook_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            webhook_path: "/webhook".to_string(),
            webhook_url: None,
        }
    }
}

/// Response delivery tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Maximum characters per outbound chat message.
    pub chunk_size: usize,
    /// How often the in-flight status message is edited.
    pub status_interval_ms: u64,
    /// Pause between consecutive chunks of one response.
    pub chunk_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            status_interval_ms: 2500,
            chunk_delay_ms: 500,
        }
    }
}

/// Accept the chat id as either a YAML integer or string.
fn chat_id_from_yaml<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Int(i) => i.to_string(),
        Raw::Str(s) => s,
    }))
}

/// The user's home directory, or `.` when it cannot be determined.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}

impl Config {
    /// Read the YAML file at `path`, apply environment overrides and validate.
    ///
    /// A missing file is tolerated: every required value can also arrive
    /// through the environment.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let config = Self::load_unvalidated(path).await?;
        config.validate()?;

        tracing::debug!(
            mode = ?config.mode,
            port = config.server.port,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Like [`Config::load`] without validation.  Used by the helper
    /// subcommands, which only need to know where the server listens.
    pub async fn load_unvalidated(path: &Path) -> anyhow::Result<Config> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(contents) => Self::from_yaml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using environment only");
                Config::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse YAML without overrides or validation.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        serde_yaml::from_str(contents).context("failed to parse config YAML")
    }

    /// Apply environment-style overrides. `lookup` returns the value of a
    /// variable, if set; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.token = Some(SecretRef::Plain(token));
        }
        if let Some(chat_id) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(cli) = get("CLAUDE_CLI_PATH") {
            self.claude.cli_path = cli;
        }
        if let Some(dir) = get("CLAUDE_WORKING_DIR") {
            self.claude.working_dir = Some(dir);
        }
        if let Some(mode) = get("CLAUDE_RELAY_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(port) = get("CLAUDE_RELAY_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid CLAUDE_RELAY_PORT: {port}"))?;
        }
        if let Some(url) = get("CLAUDE_RELAY_WEBHOOK_URL") {
            self.server.webhook_url = Some(url);
        }
        Ok(())
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bot_token().is_none() {
            anyhow::bail!("config: telegram.token is missing (or set TELEGRAM_BOT_TOKEN)");
        }
        match self.telegram.chat_id.as_deref() {
            Some(id) if !id.trim().is_empty() => {}
            _ => anyhow::bail!("config: telegram.chat_id is missing (or set TELEGRAM_CHAT_ID)"),
        }
        if !self.server.webhook_path.starts_with('/') {
            anyhow::bail!(
                "config: server.webhook_path must start with '/', got '{}'",
                self.server.webhook_path
            );
        }
        if self.bridge.chunk_size == 0 || self.bridge.chunk_size > 4096 {
            anyhow::bail!(
                "config: bridge.chunk_size must be between 1 and 4096, got {}",
                self.bridge.chunk_size
            );
        }
        if self.claude.conversation_timeout_secs == 0 {
            anyhow::bail!("config: claude.conversation_timeout_secs must be greater than zero");
        }
        if self.mode == Mode::Webhook && self.server.webhook_url.is_none() {
            anyhow::bail!("config: webhook mode requires server.webhook_url");
        }
        Ok(())
    }

    /// Resolved bot token.
    pub fn bot_token(&self) -> Option<String> {
        self.telegram.token.as_ref().and_then(SecretRef::resolve)
    }

    /// Resolved webhook secret, if configured.
    pub fn webhook_secret(&self) -> Option<String> {
        self.telegram.webhook_secret.as_ref().and_then(SecretRef::resolve)
    }

    /// The authorized chat id (empty when unset; `validate` rejects that).
    pub fn chat_id(&self) -> &str {
        self.telegram.chat_id.as_deref().unwrap_or("")
    }

    /// Serialize and write the configuration back to a YAML file.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml::to_string(self).context("serialize config YAML")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        tokio::fs::write(path, &contents)
            .await
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}
