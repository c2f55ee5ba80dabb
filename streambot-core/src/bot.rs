//! Bot abstraction for sending, editing, and deleting messages.
//!
//! [`Bot`] trait is transport-agnostic; [`TelegramBot`] implements it via
//! teloxide. Platform errors are carried as strings so callers can classify
//! them ("not modified", parse failure, flood-wait) without depending on the
//! transport crate.

use crate::buttons::ButtonLayout;
use crate::error::{Result, StreamBotError};
use crate::types::{Chat, MessageOptions};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
};

/// Abstraction over the chat platform's message API.
///
/// Message ids are transport-specific strings (Telegram numeric ids). Send
/// methods return the new message's id so streamed replies can edit it later.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Sends a text message and returns its id.
    async fn send_message(&self, chat: &Chat, text: &str, opts: &MessageOptions) -> Result<String>;
    /// Edits an already-sent message.
    async fn edit_message(
        &self,
        chat: &Chat,
        message_id: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<()>;
    /// Deletes a message.
    async fn delete_message(&self, chat: &Chat, message_id: &str) -> Result<()>;
    /// Sends a photo from raw bytes, with an optional caption; returns the message id.
    async fn send_photo(&self, chat: &Chat, data: Vec<u8>, caption: Option<&str>)
        -> Result<String>;
}

/// Teloxide-based implementation of [`Bot`].
pub struct TelegramBot {
    bot: teloxide::Bot,
}

/// Parses a message id string into an i32. Used by edit and delete.
pub fn parse_message_id(s: &str) -> Result<i32> {
    s.parse()
        .map_err(|_| StreamBotError::Bot(format!("Invalid message_id: {}", s)))
}

/// Converts a transport-agnostic [`ButtonLayout`] into teloxide inline-keyboard markup.
fn to_markup(layout: &ButtonLayout) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(layout.rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.action.callback_data()))
            .collect::<Vec<_>>()
    }))
}

impl TelegramBot {
    /// Creates a bot using the given Telegram bot token.
    pub fn new(token: String) -> Self {
        Self {
            bot: teloxide::Bot::new(token),
        }
    }
}

#[async_trait]
impl Bot for TelegramBot {
    async fn send_message(&self, chat: &Chat, text: &str, opts: &MessageOptions) -> Result<String> {
        let mut req = self.bot.send_message(ChatId(chat.id), text);
        if opts.markdown {
            req = req.parse_mode(ParseMode::MarkdownV2);
        }
        if let Some(layout) = &opts.buttons {
            req = req.reply_markup(to_markup(layout));
        }
        let sent = req
            .await
            .map_err(|e| StreamBotError::Bot(e.to_string()))?;
        Ok(sent.id.0.to_string())
    }

    async fn edit_message(
        &self,
        chat: &Chat,
        message_id: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<()> {
        let id = parse_message_id(message_id)?;
        let mut req = self
            .bot
            .edit_message_text(ChatId(chat.id), MessageId(id), text);
        if opts.markdown {
            req = req.parse_mode(ParseMode::MarkdownV2);
        }
        if let Some(layout) = &opts.buttons {
            req = req.reply_markup(to_markup(layout));
        }
        req.await.map_err(|e| StreamBotError::Bot(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, chat: &Chat, message_id: &str) -> Result<()> {
        let id = parse_message_id(message_id)?;
        self.bot
            .delete_message(ChatId(chat.id), MessageId(id))
            .await
            .map_err(|e| StreamBotError::Bot(e.to_string()))?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: &Chat,
        data: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<String> {
        let mut req = self
            .bot
            .send_photo(ChatId(chat.id), InputFile::memory(data));
        if let Some(caption) = caption {
            req = req.caption(caption.to_string());
        }
        let sent = req
            .await
            .map_err(|e| StreamBotError::Bot(e.to_string()))?;
        Ok(sent.id.0.to_string())
    }
}
