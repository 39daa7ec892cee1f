//! Telegram collaborators for the relay engine.
//!
//! Push mode receives Bot API updates and retrieves media through the bot's
//! `getFile` indirection. Pull mode reads channel history through an HTTP
//! history bridge that holds the user session.

pub mod error;
pub mod history;
pub mod resolver;
pub mod update;

pub use {
    error::{Error, Result},
    history::HistoryBridgeSource,
    resolver::BotFileResolver,
    update::Update,
};
