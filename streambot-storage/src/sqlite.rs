//! SQLite-backed [`ResponseStore`] over sqlx.
//!
//! Version history and button state are stored as JSON columns; the record is
//! small (one row per turn) so the denormalized layout keeps reads to a single
//! query.

use crate::models::{LatestText, ResponseRecord, VersionRecord};
use crate::store::{ResponseStore, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use streambot_core::ButtonState;
use tracing::info;

/// Manages a single SQLite pool; creates the DB file if missing.
#[derive(Clone)]
pub struct SqliteResponseStore {
    pool: SqlitePool,
}

/// Flat row shape for the `responses` table; JSON columns are decoded after fetch.
#[derive(sqlx::FromRow)]
struct ResponseRow {
    id: String,
    turn_id: String,
    chat_id: i64,
    source_message_id: String,
    anchor_message_id: String,
    versions: String,
    current_version_index: i64,
    button_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResponseRow {
    fn into_record(self) -> Result<ResponseRecord, StorageError> {
        let versions: Vec<VersionRecord> = serde_json::from_str(&self.versions)?;
        let button_state: ButtonState = serde_json::from_str(&self.button_state)?;
        Ok(ResponseRecord {
            id: self.id,
            turn_id: self.turn_id,
            chat_id: self.chat_id,
            source_message_id: self.source_message_id,
            anchor_message_id: self.anchor_message_id,
            versions,
            current_version_index: self.current_version_index as usize,
            button_state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl SqliteResponseStore {
    /// Opens (or creates) the database at `database_url` and runs migrations.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        info!("Initializing SQLite response store: {}", database_url);

        let options = SqliteConnectOptions::new()
            .create_if_missing(true)
            .filename(database_url);

        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        info!("Creating response tables if not exist");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS responses (
                id TEXT PRIMARY KEY,
                turn_id TEXT NOT NULL UNIQUE,
                chat_id INTEGER NOT NULL,
                source_message_id TEXT NOT NULL,
                anchor_message_id TEXT NOT NULL,
                versions TEXT NOT NULL,
                current_version_index INTEGER NOT NULL,
                button_state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS latest_texts (
                turn_id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                image_base64 TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_responses_chat_id ON responses(chat_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ResponseStore for SqliteResponseStore {
    async fn create_response(&self, record: &ResponseRecord) -> Result<(), StorageError> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM responses WHERE turn_id = ?")
                .bind(&record.turn_id)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(StorageError::AlreadyExists(record.turn_id.clone()));
        }

        let versions = serde_json::to_string(&record.versions)?;
        let button_state = serde_json::to_string(&record.button_state)?;

        sqlx::query(
            r#"
            INSERT INTO responses
                (id, turn_id, chat_id, source_message_id, anchor_message_id,
                 versions, current_version_index, button_state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.turn_id)
        .bind(record.chat_id)
        .bind(&record.source_message_id)
        .bind(&record.anchor_message_id)
        .bind(&versions)
        .bind(record.current_version_index as i64)
        .bind(&button_state)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_response(&self, turn_id: &str) -> Result<Option<ResponseRecord>, StorageError> {
        let row: Option<ResponseRow> =
            sqlx::query_as("SELECT * FROM responses WHERE turn_id = ?")
                .bind(turn_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ResponseRow::into_record).transpose()
    }

    async fn save_response(&self, record: &ResponseRecord) -> Result<(), StorageError> {
        let versions = serde_json::to_string(&record.versions)?;
        let button_state = serde_json::to_string(&record.button_state)?;

        let result = sqlx::query(
            r#"
            UPDATE responses
            SET versions = ?, current_version_index = ?, button_state = ?, updated_at = ?
            WHERE turn_id = ?
            "#,
        )
        .bind(&versions)
        .bind(record.current_version_index as i64)
        .bind(&button_state)
        .bind(Utc::now())
        .bind(&record.turn_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(record.turn_id.clone()));
        }
        Ok(())
    }

    async fn save_latest_text(
        &self,
        turn_id: &str,
        text: &str,
        image_base64: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO latest_texts (turn_id, text, image_base64, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(turn_id) DO UPDATE SET
                text = excluded.text,
                image_base64 = excluded.image_base64,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(turn_id)
        .bind(text)
        .bind(image_base64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_latest_text(&self, turn_id: &str) -> Result<Option<LatestText>, StorageError> {
        let row: Option<(String, String, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT turn_id, text, image_base64, updated_at FROM latest_texts WHERE turn_id = ?",
        )
        .bind(turn_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(turn_id, text, image_base64, updated_at)| LatestText {
            turn_id,
            text,
            image_base64,
            updated_at,
        }))
    }
}
