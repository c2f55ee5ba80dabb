//! Delivery loop: consumes the tagged chunk stream and drives a [`Session`].
//!
//! Buffers arriving fragments and renders periodically (by accumulated size
//! or by max delay), opens continuation messages when the formatted display
//! would exceed the safe ceiling, observes the abort flag at loop boundaries,
//! and finalizes on `Done`, channel close, or abort.

use crate::session::{FinalizeOptions, Session};
use std::time::Duration;
use streambot_core::{ButtonState, Result, StreamChunk};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Accumulated chars before flushing a render to the platform.
const FLUSH_CHUNK_SIZE: usize = 50;
/// Max delay before flushing buffered content even if the chunk size is not reached.
const MAX_FLUSH_DELAY: Duration = Duration::from_secs(2);

/// Result of receiving from the channel with an optional timeout.
#[derive(Debug)]
enum RecvWithTimeout {
    Item(StreamChunk),
    Closed,
    Timeout,
}

/// Receives one chunk. With a timeout, races the recv against a sleep and
/// reports `Timeout` when the sleep wins.
async fn recv_with_timeout(
    rx: &mut mpsc::UnboundedReceiver<StreamChunk>,
    timeout: Option<Duration>,
) -> RecvWithTimeout {
    match timeout {
        None => match rx.recv().await {
            Some(chunk) => RecvWithTimeout::Item(chunk),
            None => RecvWithTimeout::Closed,
        },
        Some(timeout) => {
            tokio::select! {
                result = rx.recv() => match result {
                    Some(chunk) => RecvWithTimeout::Item(chunk),
                    None => RecvWithTimeout::Closed,
                },
                _ = tokio::time::sleep(timeout) => RecvWithTimeout::Timeout,
            }
        }
    }
}

/// Runs one turn to completion: reads chunks until `Done`, close, or abort,
/// then finalizes the session and returns the resulting button state.
pub async fn run_delivery_loop(
    session: &mut Session,
    rx: &mut mpsc::UnboundedReceiver<StreamChunk>,
) -> Result<ButtonState> {
    let mut pending_chars = 0usize;
    let mut last_flush = Instant::now();

    loop {
        // Cooperative cancellation, observed per loop iteration only.
        if session.is_aborted() {
            debug!(turn_id = %session.turn_id(), "Abort observed, finalizing stopped turn");
            return session
                .finalize(FinalizeOptions {
                    stopped_by_user: true,
                    ..Default::default()
                })
                .await;
        }

        let timeout = (pending_chars > 0)
            .then(|| MAX_FLUSH_DELAY.saturating_sub(last_flush.elapsed()));

        match recv_with_timeout(rx, timeout).await {
            RecvWithTimeout::Closed => {
                // Producer went away without a Done; treat as end of stream.
                debug!(turn_id = %session.turn_id(), "Chunk stream closed");
                return session.finalize(FinalizeOptions::default()).await;
            }
            RecvWithTimeout::Timeout => {
                session.render_live().await;
                pending_chars = 0;
                last_flush = Instant::now();
            }
            RecvWithTimeout::Item(chunk) => match chunk {
                StreamChunk::Text(s) => {
                    pending_chars += s.chars().count();
                    session.append_text(&s);
                    flush_if_due(session, &mut pending_chars, &mut last_flush).await?;
                }
                StreamChunk::Thinking(s) => {
                    pending_chars += s.chars().count();
                    session.append_thinking(&s);
                    flush_if_due(session, &mut pending_chars, &mut last_flush).await?;
                }
                StreamChunk::Image(image) => {
                    session.add_image(image);
                }
                StreamChunk::Citation(citation) => {
                    session.add_citation(citation);
                }
                StreamChunk::Done => {
                    return session.finalize(FinalizeOptions::default()).await;
                }
            },
        }
    }
}

/// Opens continuation messages while the formatted display exceeds the safe
/// ceiling, then renders when enough content accumulated.
async fn flush_if_due(
    session: &mut Session,
    pending_chars: &mut usize,
    last_flush: &mut Instant,
) -> Result<()> {
    while session.needs_continuation() {
        session.create_continuation_message().await?;
        *pending_chars = 0;
        *last_flush = Instant::now();
    }
    if *pending_chars >= FLUSH_CHUNK_SIZE {
        session.render_live().await;
        *pending_chars = 0;
        *last_flush = Instant::now();
    }
    Ok(())
}
