//! Response and version models for persistence.
//!
//! A [`ResponseRecord`] holds the append-only version history for one turn;
//! a [`VersionRecord`] is an immutable snapshot appended on finalize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streambot_core::{ButtonState, Citation};
use uuid::Uuid;

/// One complete attempt at answering a turn (original or a retry).
///
/// Append-only: once written into a [`ResponseRecord`] a version is never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    /// 1-based, monotonic per response.
    pub version_id: u32,
    pub created_at: DateTime<Utc>,
    /// Platform message ids used to render this version, anchor first.
    pub message_ids: Vec<String>,
    pub text: String,
    pub thinking: String,
    pub citations: Vec<Citation>,
    pub error: Option<String>,
    pub stopped_by_user: bool,
    /// Base64 image payload, when the model produced one.
    pub image_base64: Option<String>,
    /// Opaque provider-specific continuation data needed only to resume later.
    pub model_parts: Option<serde_json::Value>,
}

/// The persisted record for one turn: identity, version history, and the
/// current UI state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: String,
    /// Stable turn id: the anchor message id of the first version.
    pub turn_id: String,
    pub chat_id: i64,
    /// The user message that originated the turn.
    pub source_message_id: String,
    /// Anchor message id; never deleted or recreated across versions.
    pub anchor_message_id: String,
    pub versions: Vec<VersionRecord>,
    /// Always a valid index into `versions` once at least one version exists.
    pub current_version_index: usize,
    pub button_state: ButtonState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResponseRecord {
    /// Creates an empty record for a new turn, with a generated UUID.
    pub fn new(
        turn_id: impl Into<String>,
        chat_id: i64,
        source_message_id: impl Into<String>,
        anchor_message_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            turn_id: turn_id.into(),
            chat_id,
            source_message_id: source_message_id.into(),
            anchor_message_id: anchor_message_id.into(),
            versions: Vec::new(),
            current_version_index: 0,
            button_state: ButtonState::Processing,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a version and points `current_version_index` at it.
    pub fn push_version(&mut self, version: VersionRecord) {
        self.versions.push(version);
        self.current_version_index = self.versions.len() - 1;
        self.updated_at = Utc::now();
    }

    /// The currently displayed version, if any version exists yet.
    pub fn current_version(&self) -> Option<&VersionRecord> {
        self.versions.get(self.current_version_index)
    }
}

/// Denormalized "latest text" row for downstream history readers, refreshed on
/// every finalize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestText {
    pub turn_id: String,
    pub text: String,
    pub image_base64: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: u32) -> VersionRecord {
        VersionRecord {
            version_id: id,
            created_at: Utc::now(),
            message_ids: vec!["10".to_string()],
            text: format!("answer {}", id),
            thinking: String::new(),
            citations: Vec::new(),
            error: None,
            stopped_by_user: false,
            image_base64: None,
            model_parts: None,
        }
    }

    /// **Test: push_version keeps current_version_index valid and pointing at the newest version.**
    #[test]
    fn push_version_tracks_current_index() {
        let mut record = ResponseRecord::new("100", 1, "99", "100");
        assert!(record.current_version().is_none());

        record.push_version(version(1));
        assert_eq!(record.current_version_index, 0);
        record.push_version(version(2));
        assert_eq!(record.current_version_index, 1);
        assert_eq!(record.current_version().unwrap().version_id, 2);
    }
}
