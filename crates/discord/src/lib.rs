//! Discord webhook sink: one multipart post per relay unit.

pub mod error;
pub mod webhook;

pub use {
    error::{Error, Result},
    webhook::DiscordWebhook,
};
