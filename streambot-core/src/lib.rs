//! Shared core for the streaming delivery bot.
//!
//! Leaf crate with no workspace dependencies: chunk and chat types, the
//! [`Bot`] transport trait with its teloxide implementation, button-state
//! model, error types, and tracing setup.

pub mod bot;
pub mod buttons;
pub mod error;
pub mod logger;
pub mod types;

pub use bot::{Bot, TelegramBot};
pub use buttons::{keyboard_for, Button, ButtonAction, ButtonLayout};
pub use error::{Result, StreamBotError};
pub use types::{ButtonState, Chat, Citation, ImagePayload, MessageOptions, StreamChunk};
