//! Per-chat adaptive edit-rate limiter.
//!
//! Telegram tolerates roughly 10 message edits per chat per minute before it
//! starts answering with flood-wait errors, and cuts off hard around 20. The
//! limiter keeps a rolling window per chat: below the soft cap edits are
//! spaced a fixed minimum apart; past it the remaining quota is spread evenly
//! over the rest of the window, so delays shrink again as the window nears its
//! reset and no caller starves.
//!
//! Call order matters: `delay_before_next_edit`, wait, attempt the edit, and
//! `record_edit` only when the platform accepted it.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rolling window length.
pub const EDIT_WINDOW: Duration = Duration::from_millis(60_000);
/// Edits per window before adaptive spreading kicks in.
pub const SOFT_CAP: u32 = 10;
/// Platform quota per window; never exceeded.
pub const HARD_CAP: u32 = 20;
/// Minimum spacing between edits below the soft cap.
pub const MIN_EDIT_SPACING: Duration = Duration::from_millis(500);

struct ChatWindow {
    count: u32,
    window_start: Instant,
    last_edit: Option<Instant>,
    /// No edit before this instant; set from a platform flood-wait error.
    penalty_until: Option<Instant>,
}

impl ChatWindow {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_edit: None,
            penalty_until: None,
        }
    }

    fn reset_if_expired(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= EDIT_WINDOW {
            self.count = 0;
            self.window_start = now;
        }
    }
}

/// Adaptive delay calculator; one window per chat id. Owned by the
/// application state and shared by reference, never a global.
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<i64, ChatWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long the caller must wait before its next edit in `chat_id`.
    /// Has no side effects; quota is only consumed by [`RateLimiter::record_edit`].
    pub async fn delay_before_next_edit(&self, chat_id: i64) -> Duration {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(chat_id)
            .or_insert_with(|| ChatWindow::fresh(now));
        window.reset_if_expired(now);

        let penalty = window
            .penalty_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        let Some(last_edit) = window.last_edit else {
            return penalty;
        };

        let spacing = if window.count < SOFT_CAP {
            (last_edit + MIN_EDIT_SPACING).saturating_duration_since(now)
        } else {
            // Past the soft cap: spread what is left of the quota evenly
            // across what is left of the window, measured from the last edit.
            let remaining_quota = HARD_CAP.saturating_sub(window.count).max(1);
            let remaining_window =
                (window.window_start + EDIT_WINDOW).saturating_duration_since(now);
            (last_edit + remaining_window / remaining_quota).saturating_duration_since(now)
        };
        spacing.max(penalty)
    }

    /// Records a platform flood wait for `chat_id`: no edit goes out until
    /// `wait` elapses, regardless of remaining local quota.
    pub async fn apply_flood_wait(&self, chat_id: i64, wait: Duration) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(chat_id)
            .or_insert_with(|| ChatWindow::fresh(now));
        window.penalty_until = Some(now + wait);
    }

    /// Records a successful edit in `chat_id`'s window.
    pub async fn record_edit(&self, chat_id: i64) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(chat_id)
            .or_insert_with(|| ChatWindow::fresh(now));
        window.reset_if_expired(now);
        window.count += 1;
        window.last_edit = Some(now);
    }
}
