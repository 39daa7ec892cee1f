//! Push-mode host: receives Telegram webhook deliveries over HTTP and hands
//! each one to the relay engine.

pub mod server;

pub use server::{AppState, build_app, start_server};
