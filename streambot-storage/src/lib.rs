//! Persistence for turn responses and their version history.
//!
//! [`ResponseStore`] is the contract the delivery engine writes through;
//! [`SqliteResponseStore`] implements it over sqlx, and [`MemoryResponseStore`]
//! is an in-process implementation for tests and ephemeral deployments.

pub mod memory;
pub mod models;
pub mod sqlite;
pub mod store;

pub use memory::MemoryResponseStore;
pub use models::{LatestText, ResponseRecord, VersionRecord};
pub use sqlite::SqliteResponseStore;
pub use store::{ResponseStore, StorageError};
