//! Error types for the bot core.
//!
//! [`StreamBotError`] is the top-level error shared across the workspace.

use thiserror::Error;

/// Top-level error (bot transport, storage, session lifecycle, IO).
#[derive(Error, Debug)]
pub enum StreamBotError {
    #[error("Bot error: {0}")]
    Bot(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations; uses [`StreamBotError`].
pub type Result<T> = std::result::Result<T, StreamBotError>;
