//! Storage contract consumed by the delivery engine.

use crate::models::{LatestText, ResponseRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Read/write contract for turn responses. Each call is individually atomic;
/// the store as a whole is only eventually consistent.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Inserts the record for a new turn. Fails if the turn already exists.
    async fn create_response(&self, record: &ResponseRecord) -> Result<(), StorageError>;
    /// Loads a turn's record by its stable turn id.
    async fn get_response(&self, turn_id: &str) -> Result<Option<ResponseRecord>, StorageError>;
    /// Replaces a turn's record (versions, index, button state).
    async fn save_response(&self, record: &ResponseRecord) -> Result<(), StorageError>;
    /// Upserts the denormalized latest-text row for downstream history readers.
    async fn save_latest_text(
        &self,
        turn_id: &str,
        text: &str,
        image_base64: Option<&str>,
    ) -> Result<(), StorageError>;
    /// Reads the latest-text row, when present.
    async fn get_latest_text(&self, turn_id: &str) -> Result<Option<LatestText>, StorageError>;
}
