//! Configuration loading, env substitution, and startup validation.
//!
//! Config files: `albumrelay.toml`, `albumrelay.yaml`, or `albumrelay.json`
//! Searched in `./` then `~/.config/albumrelay/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values. The loaded
//! [`RelayConfig`] is immutable and handed to every component by reference.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        DiscordConfig, RelayConfig, RelaySettings, ServerConfig, StorageConfig, TelegramConfig,
    },
    validate::Mode,
};
