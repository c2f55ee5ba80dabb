//! Streaming delivery and versioning engine.
//!
//! Streams an incrementally-arriving answer into a small number of editable
//! chat messages under the platform's edit-rate quota and per-message size
//! ceiling, with cancellation, retries, and paging between answer versions.
//!
//! Component stack, leaves first:
//!
//! - [`rate_limiter::RateLimiter`] — per-chat adaptive edit spacing.
//! - [`splitter::smart_split`] — boundary-preserving text splitting.
//! - [`message_editor::MessageEditor`] — single-edit primitive with outcome
//!   classification.
//! - [`streaming_editor::StreamingEditor`] — per-message controller: stale-write
//!   guard, idle status rotation, markdown fallback.
//! - [`session::Session`] — one user turn: buffers, continuation chain,
//!   cancellation, and the persisted version history.
//! - [`delivery_loop::run_delivery_loop`] — consumes the chunk stream and
//!   drives a session to finalization.

pub mod delivery_loop;
pub mod message_editor;
pub mod rate_limiter;
pub mod render;
pub mod session;
pub mod splitter;
pub mod streaming_editor;

pub use delivery_loop::run_delivery_loop;
pub use message_editor::{EditFailure, EditOutcome, MessageEditor};
pub use rate_limiter::RateLimiter;
pub use session::{
    AbortHandle, FinalizeOptions, Session, SessionDeps, VersionDirection, SAFE_MESSAGE_LEN,
};
pub use splitter::{smart_split, SplitResult};
pub use streaming_editor::{ButtonSource, RawParts, StreamingEditor, UpdateOptions};
