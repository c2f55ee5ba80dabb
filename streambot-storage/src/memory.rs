//! In-memory [`ResponseStore`] for tests and ephemeral deployments.

use crate::models::{LatestText, ResponseRecord};
use crate::store::{ResponseStore, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// HashMap-backed store keyed by turn id.
#[derive(Default)]
pub struct MemoryResponseStore {
    responses: Mutex<HashMap<String, ResponseRecord>>,
    latest_texts: Mutex<HashMap<String, LatestText>>,
}

impl MemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseStore for MemoryResponseStore {
    async fn create_response(&self, record: &ResponseRecord) -> Result<(), StorageError> {
        let mut responses = self.responses.lock().await;
        if responses.contains_key(&record.turn_id) {
            return Err(StorageError::AlreadyExists(record.turn_id.clone()));
        }
        responses.insert(record.turn_id.clone(), record.clone());
        Ok(())
    }

    async fn get_response(&self, turn_id: &str) -> Result<Option<ResponseRecord>, StorageError> {
        Ok(self.responses.lock().await.get(turn_id).cloned())
    }

    async fn save_response(&self, record: &ResponseRecord) -> Result<(), StorageError> {
        let mut responses = self.responses.lock().await;
        if !responses.contains_key(&record.turn_id) {
            return Err(StorageError::NotFound(record.turn_id.clone()));
        }
        responses.insert(record.turn_id.clone(), record.clone());
        Ok(())
    }

    async fn save_latest_text(
        &self,
        turn_id: &str,
        text: &str,
        image_base64: Option<&str>,
    ) -> Result<(), StorageError> {
        self.latest_texts.lock().await.insert(
            turn_id.to_string(),
            LatestText {
                turn_id: turn_id.to_string(),
                text: text.to_string(),
                image_base64: image_base64.map(|s| s.to_string()),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_latest_text(&self, turn_id: &str) -> Result<Option<LatestText>, StorageError> {
        Ok(self.latest_texts.lock().await.get(turn_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Test: create, read back, save, and latest-text upsert round-trip.**
    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryResponseStore::new();
        let mut record = ResponseRecord::new("100", 1, "99", "100");

        store.create_response(&record).await.unwrap();
        assert!(matches!(
            store.create_response(&record).await,
            Err(StorageError::AlreadyExists(_))
        ));

        record.current_version_index = 0;
        store.save_response(&record).await.unwrap();
        let loaded = store.get_response("100").await.unwrap().unwrap();
        assert_eq!(loaded.turn_id, "100");
        assert_eq!(loaded.chat_id, 1);

        store
            .save_latest_text("100", "final answer", None)
            .await
            .unwrap();
        let latest = store.get_latest_text("100").await.unwrap().unwrap();
        assert_eq!(latest.text, "final answer");
        assert!(latest.image_base64.is_none());
    }

    /// **Test: saving an unknown turn fails with NotFound.**
    #[tokio::test]
    async fn memory_store_save_unknown_turn() {
        let store = MemoryResponseStore::new();
        let record = ResponseRecord::new("42", 1, "41", "42");
        assert!(matches!(
            store.save_response(&record).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
