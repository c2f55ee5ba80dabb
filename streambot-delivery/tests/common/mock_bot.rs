//! Mock implementation of [`streambot_core::Bot`] for integration tests.
//!
//! Records every send/edit/delete/photo call so tests can assert on the exact
//! rendered texts without hitting the platform, and can script edit failures
//! (parse errors, flood waits) for the fallback paths.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use streambot_core::{Bot, Chat, MessageOptions, Result, StreamBotError};

/// One recorded platform call.
#[derive(Debug, Clone)]
#[allow(dead_code)] // fields kept for assertions across different tests
pub enum BotCall {
    Send {
        message_id: String,
        text: String,
        has_buttons: bool,
    },
    Edit {
        message_id: String,
        text: String,
        markdown: bool,
        has_buttons: bool,
    },
    Delete {
        message_id: String,
    },
    Photo {
        byte_len: usize,
    },
}

/// Mock bot: allocates incrementing message ids from 100 and records calls.
pub struct MockBot {
    next_id: AtomicI64,
    calls: Mutex<Vec<BotCall>>,
    edit_failures: Mutex<VecDeque<String>>,
}

#[allow(dead_code)] // helpers used by different test files
impl MockBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(100),
            calls: Mutex::new(Vec::new()),
            edit_failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Scripts the next `edit_message` call to fail with `error`.
    pub fn fail_next_edit(&self, error: &str) {
        self.edit_failures
            .lock()
            .unwrap()
            .push_back(error.to_string());
    }

    pub fn calls(&self) -> Vec<BotCall> {
        self.calls.lock().unwrap().clone()
    }

    /// All edits as `(message_id, text)`, in call order.
    pub fn edits(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BotCall::Edit {
                    message_id, text, ..
                } => Some((message_id, text)),
                _ => None,
            })
            .collect()
    }

    /// Edits applied to one message, texts only, in call order.
    pub fn edits_for(&self, message_id: &str) -> Vec<String> {
        self.edits()
            .into_iter()
            .filter(|(id, _)| id == message_id)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BotCall::Delete { message_id } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    pub fn photo_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BotCall::Photo { .. }))
            .count()
    }
}

#[async_trait]
impl Bot for MockBot {
    async fn send_message(&self, _chat: &Chat, text: &str, opts: &MessageOptions) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.calls.lock().unwrap().push(BotCall::Send {
            message_id: id.clone(),
            text: text.to_string(),
            has_buttons: opts.buttons.is_some(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        _chat: &Chat,
        message_id: &str,
        text: &str,
        opts: &MessageOptions,
    ) -> Result<()> {
        if let Some(error) = self.edit_failures.lock().unwrap().pop_front() {
            return Err(StreamBotError::Bot(error));
        }
        self.calls.lock().unwrap().push(BotCall::Edit {
            message_id: message_id.to_string(),
            text: text.to_string(),
            markdown: opts.markdown,
            has_buttons: opts.buttons.is_some(),
        });
        Ok(())
    }

    async fn delete_message(&self, _chat: &Chat, message_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(BotCall::Delete {
            message_id: message_id.to_string(),
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        _chat: &Chat,
        data: Vec<u8>,
        _caption: Option<&str>,
    ) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.calls
            .lock()
            .unwrap()
            .push(BotCall::Photo {
                byte_len: data.len(),
            });
        Ok(id)
    }
}
