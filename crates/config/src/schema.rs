//! Config schema types (telegram source, discord sink, relay tuning, storage, server).

use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

/// Root configuration value, constructed once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
    pub relay: RelaySettings,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

impl RelayConfig {
    /// Largest file, in bytes, the sink accepts.
    #[must_use]
    pub fn max_file_bytes(&self) -> u64 {
        self.discord.max_file_mb.saturating_mul(1024 * 1024)
    }
}

/// Source platform settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token used in push mode to resolve and download files.
    pub bot_token: Secret<String>,

    /// Bot API base URL.
    pub api_url: String,

    /// Base URL of the history bridge used in pull mode.
    pub history_url: Option<String>,

    /// Default channel for `export` (e.g. `@example`).
    pub channel: Option<String>,

    /// Expected `X-Telegram-Bot-Api-Secret-Token` on inbound webhooks.
    pub webhook_secret: Option<Secret<String>>,
}

impl TelegramConfig {
    #[must_use]
    pub fn has_bot_token(&self) -> bool {
        !self.bot_token.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("history_url", &self.history_url)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: Secret::new(String::new()),
            api_url: "https://api.telegram.org".into(),
            history_url: None,
            channel: None,
            webhook_secret: None,
        }
    }
}

/// Destination webhook settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Webhook URL. Carries its own token, so it is kept secret.
    pub webhook_url: Secret<String>,

    /// Files above this size (MiB) are skipped.
    pub max_file_mb: u64,

    /// Prepended to a non-empty caption in the posted note.
    pub caption_prefix: String,

    /// Whole-request timeout (seconds).
    pub timeout_secs: u64,
}

impl DiscordConfig {
    #[must_use]
    pub fn has_webhook_url(&self) -> bool {
        !self.webhook_url.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("webhook_url", &"[REDACTED]")
            .field("max_file_mb", &self.max_file_mb)
            .field("caption_prefix", &self.caption_prefix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            webhook_url: Secret::new(String::new()),
            max_file_mb: 8,
            caption_prefix: "**Caption:** ".into(),
            timeout_secs: 30,
        }
    }
}

/// Aggregation and throttling knobs shared by pull and push mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Messages requested per history page.
    pub page_size: usize,

    /// Relay units allowed per rate window.
    pub max_units_per_window: u32,

    /// Rate window length (seconds).
    pub window_secs: u64,

    /// Push mode: a group untouched for this long is considered complete.
    pub group_idle_secs: u64,

    /// Extra attempts for a failed history page fetch.
    pub fetch_retries: u32,

    /// Delay between page fetch attempts (ms).
    pub fetch_backoff_ms: u64,
}

impl RelaySettings {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Idle threshold, never below one second.
    #[must_use]
    pub fn group_idle(&self) -> Duration {
        Duration::from_secs(self.group_idle_secs.max(1))
    }

    #[must_use]
    pub fn fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_backoff_ms)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_units_per_window: 30,
            window_secs: 60,
            group_idle_secs: 2,
            fetch_retries: 3,
            fetch_backoff_ms: 1000,
        }
    }
}

/// Where durable and scratch state lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,

    /// Overrides `<data_dir>/checkpoint.txt`.
    pub checkpoint_path: Option<PathBuf>,
}

impl StorageConfig {
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("checkpoint.txt"))
    }

    /// Pull-mode download scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    /// Push-mode group records, one directory per group.
    #[must_use]
    pub fn groups_dir(&self) -> PathBuf {
        self.data_dir.join("relay").join("groups")
    }

    /// Push-mode staging for standalone images.
    #[must_use]
    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir.join("relay").join("inbox")
    }

    #[must_use]
    pub fn last_update_path(&self) -> PathBuf {
        self.data_dir.join("last_update.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("var"),
            checkpoint_path: None,
        }
    }
}

/// Push-mode webhook host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Write each raw inbound update to `<data_dir>/last_update.json`.
    pub dump_last_update: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            dump_last_update: false,
        }
    }
}
