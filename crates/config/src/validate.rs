//! Startup validation. Missing credentials or destinations are fatal before
//! any work begins.

use crate::{
    error::{Error, Result},
    schema::RelayConfig,
};

/// Entry point the configuration is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Pull mode: walk channel history.
    Export,
    /// Push mode: webhook host.
    Serve,
    /// Push mode: one-shot idle sweep.
    Sweep,
}

impl RelayConfig {
    /// Check that every setting `mode` depends on is present and sane.
    pub fn validate_for(&self, mode: Mode) -> Result<()> {
        if !self.discord.has_webhook_url() {
            return Err(Error::Missing {
                field: "discord.webhook_url",
                hint: "set DISCORD_WEBHOOK_URL",
            });
        }
        if self.discord.max_file_mb == 0 {
            return Err(Error::Invalid {
                field: "discord.max_file_mb",
                message: "must be at least 1".into(),
            });
        }

        match mode {
            Mode::Export => {
                if self.telegram.history_url.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Missing {
                        field: "telegram.history_url",
                        hint: "set HISTORY_BRIDGE_URL",
                    });
                }
                if self.telegram.channel.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Missing {
                        field: "telegram.channel",
                        hint: "pass --channel or set EXPORT_CHANNEL",
                    });
                }
                if self.relay.page_size == 0 {
                    return Err(Error::Invalid {
                        field: "relay.page_size",
                        message: "must be at least 1".into(),
                    });
                }
            },
            Mode::Serve => {
                if !self.telegram.has_bot_token() {
                    return Err(Error::Missing {
                        field: "telegram.bot_token",
                        hint: "set TELEGRAM_TOKEN",
                    });
                }
            },
            Mode::Sweep => {},
        }
        Ok(())
    }
}
