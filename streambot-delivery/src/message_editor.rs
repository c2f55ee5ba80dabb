//! Single-message edit primitive: rate-limited, with outcome classification.
//!
//! Transient platform failures are returned as values, never panics, so the
//! stream loop and the idle loop can decide to retry, skip, or give up
//! without unwinding unrelated state.

use crate::rate_limiter::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use streambot_core::{Bot, Chat, MessageOptions};
use thiserror::Error;
use tracing::{debug, warn};

/// Successful edit outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The platform applied the edit.
    Written,
    /// Content was already identical; treated as success. Either detected
    /// locally (no network call) or reported by the platform as "not modified".
    Unchanged,
}

/// Classified edit failures. Retryable-vs-fatal is the caller's concern.
#[derive(Debug, Clone, Error)]
pub enum EditFailure {
    /// The platform rejected the markup; recoverable via a safe re-render.
    #[error("markup parse error: {0}")]
    Parse(String),
    /// Flood-wait: the platform asked to retry after the given seconds.
    #[error("flood wait {seconds}s: {message}")]
    FloodWait { seconds: u64, message: String },
    /// Anything else (network, permissions, deleted message).
    #[error("edit failed: {0}")]
    Other(String),
}

/// True when the platform reports the content is unchanged; treat as success.
pub fn is_not_modified_error(error: &str) -> bool {
    error.contains("message is not modified") || error.contains("exactly the same")
}

/// True when the platform could not parse the message entities (markup).
pub fn is_parse_error(error: &str) -> bool {
    error.contains("can't parse entities") || error.contains("can't parse message text")
}

/// Parses "Retry after Ns" from a platform error string.
pub fn extract_retry_after_seconds(error: &str) -> Option<u64> {
    let pattern = "Retry after ";
    let start = error.find(pattern)? + pattern.len();
    let end = error[start..].find('s')?;
    error[start..start + end].trim().parse().ok()
}

/// Edits one message: waits out the rate limiter, performs the edit, and
/// classifies the result. Quota is recorded only when the platform accepted
/// the call.
pub struct MessageEditor {
    bot: Arc<dyn Bot>,
    limiter: Arc<RateLimiter>,
}

impl MessageEditor {
    pub fn new(bot: Arc<dyn Bot>, limiter: Arc<RateLimiter>) -> Self {
        Self { bot, limiter }
    }

    /// Waits for the rate limiter's delay for `chat_id` to pass.
    pub async fn wait_turn(&self, chat_id: i64) {
        let delay = self.limiter.delay_before_next_edit(chat_id).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Full contract: local no-op check, rate-limiter wait, then the edit.
    ///
    /// `last_rendered` is the last text known to be on the message; when it
    /// equals `text` the call succeeds without touching the network.
    pub async fn edit(
        &self,
        chat: &Chat,
        message_id: &str,
        text: &str,
        opts: &MessageOptions,
        last_rendered: Option<&str>,
    ) -> Result<EditOutcome, EditFailure> {
        if last_rendered == Some(text) {
            debug!(message_id, "Edit skipped, content unchanged");
            return Ok(EditOutcome::Unchanged);
        }
        self.wait_turn(chat.id).await;
        self.apply(chat, message_id, text, opts, last_rendered).await
    }

    /// Performs the edit without waiting. Callers that need a staleness check
    /// between the rate-limiter wait and the write (the streaming editor) call
    /// [`MessageEditor::wait_turn`] themselves and then `apply`.
    pub async fn apply(
        &self,
        chat: &Chat,
        message_id: &str,
        text: &str,
        opts: &MessageOptions,
        last_rendered: Option<&str>,
    ) -> Result<EditOutcome, EditFailure> {
        if last_rendered == Some(text) {
            debug!(message_id, "Edit skipped, content unchanged");
            return Ok(EditOutcome::Unchanged);
        }

        match self.bot.edit_message(chat, message_id, text, opts).await {
            Ok(()) => {
                self.limiter.record_edit(chat.id).await;
                Ok(EditOutcome::Written)
            }
            Err(e) => {
                let message = e.to_string();
                if is_not_modified_error(&message) {
                    // The call still hit the platform and consumed quota.
                    self.limiter.record_edit(chat.id).await;
                    return Ok(EditOutcome::Unchanged);
                }
                if is_parse_error(&message) {
                    return Err(EditFailure::Parse(message));
                }
                if let Some(seconds) = extract_retry_after_seconds(&message) {
                    // Honor the platform's back-off: subsequent waits for this
                    // chat are pushed past it.
                    warn!(chat_id = chat.id, seconds, "Flood wait reported, backing off");
                    self.limiter
                        .apply_flood_wait(chat.id, Duration::from_secs(seconds))
                        .await;
                    return Err(EditFailure::FloodWait { seconds, message });
                }
                Err(EditFailure::Other(message))
            }
        }
    }
}
