use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::RelayConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "albumrelay.toml",
    "albumrelay.yaml",
    "albumrelay.yml",
    "albumrelay.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./albumrelay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/albumrelay/albumrelay.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found.
pub fn discover_and_load() -> RelayConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    RelayConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/albumrelay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "albumrelay").map(|d| d.config_dir().to_path_buf())
}

/// Overlay the process environment onto `config`.
///
/// Recognised: `TELEGRAM_TOKEN`, `TELEGRAM_API_URL`, `HISTORY_BRIDGE_URL`,
/// `EXPORT_CHANNEL`, `WEBHOOK_SECRET`, `DISCORD_WEBHOOK_URL`, `DISCORD_MAX_MB`,
/// `RELAY_DATA_DIR`.
pub fn apply_env_overrides(config: &mut RelayConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut RelayConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("TELEGRAM_TOKEN") {
        config.telegram.bot_token = Secret::new(token);
    }
    if let Some(url) = get("TELEGRAM_API_URL") {
        config.telegram.api_url = url;
    }
    if let Some(url) = get("HISTORY_BRIDGE_URL") {
        config.telegram.history_url = Some(url);
    }
    if let Some(channel) = get("EXPORT_CHANNEL") {
        config.telegram.channel = Some(channel);
    }
    if let Some(secret) = get("WEBHOOK_SECRET") {
        config.telegram.webhook_secret = Some(Secret::new(secret));
    }
    if let Some(url) = get("DISCORD_WEBHOOK_URL") {
        config.discord.webhook_url = Secret::new(url);
    }
    if let Some(raw) = get("DISCORD_MAX_MB") {
        match raw.trim().parse() {
            Ok(mb) => config.discord.max_file_mb = mb,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid DISCORD_MAX_MB"),
        }
    }
    if let Some(dir) = get("RELAY_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}
