//! Shared types, error definitions, and collaborator traits used across all
//! albumrelay crates.

pub mod error;
pub mod sink;
pub mod source;
pub mod types;

pub use error::{Error, FromMessage, Result};
