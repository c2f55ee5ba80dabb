//! Core types: chat identity, the stream chunk union, and the button-state model.

use serde::{Deserialize, Serialize};

/// Chat (conversation) identity; transport-specific numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Chat {
    pub fn new(id: i64) -> Self {
        Self { id }
    }
}

/// One fragment of an externally-produced answer stream.
///
/// The stream is forward-only and terminated by exactly one [`StreamChunk::Done`].
/// Matching is exhaustive on purpose: adding a variant must force every consumer
/// to handle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamChunk {
    /// Answer text fragment.
    Text(String),
    /// Model reasoning fragment, rendered separately from the answer.
    Thinking(String),
    /// Inline image produced by the model.
    Image(ImagePayload),
    /// Grounding/citation record attached to the answer.
    Citation(Citation),
    /// End of stream. Sent exactly once.
    Done,
}

/// Image payload carried by the stream and persisted with a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Base64-encoded image bytes.
    pub data_base64: String,
    pub mime_type: String,
}

/// Citation / grounding record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: Option<String>,
    pub url: String,
}

/// Options for an outbound send or edit.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Render with MarkdownV2 parse mode. When false the text is sent plain.
    pub markdown: bool,
    /// Inline keyboard attached to the message; `None` removes any keyboard.
    pub buttons: Option<crate::buttons::ButtonLayout>,
}

/// UI affordance attached to a turn's current message, derived from its
/// version history and completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonState {
    /// Turn finished cleanly with a single version; nothing to show.
    None,
    /// Stream active; show a stop button.
    Processing,
    /// Single failed or stopped version; show retry only.
    RetryOnly,
    /// Two or more versions; show prev / retry / next.
    HasVersions,
    /// The originating user message was edited after the fact.
    EditDetected,
}

impl ButtonState {
    /// State after `finalize`: `HasVersions` when more than one version exists,
    /// otherwise `RetryOnly` for a stopped or errored turn, otherwise `None`.
    pub fn on_finalize(version_count: usize, stopped_or_errored: bool) -> Self {
        if version_count > 1 {
            ButtonState::HasVersions
        } else if stopped_or_errored {
            ButtonState::RetryOnly
        } else {
            ButtonState::None
        }
    }
}
