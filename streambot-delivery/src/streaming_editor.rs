//! Stateful controller for one live message.
//!
//! Serializes edits through a monotonic version counter (last-writer-wins
//! without a lock), rotates an idle status line while no real content
//! arrives, and falls back to a fully-escaped render when the platform
//! rejects the markup.
//!
//! One instance per live message; a continuation message gets a fresh
//! instance rather than mutating this one.

use crate::message_editor::{EditFailure, EditOutcome, MessageEditor};
use crate::rate_limiter::RateLimiter;
use crate::render;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use streambot_core::{Bot, ButtonLayout, Chat, MessageOptions};

/// Base idle re-render interval.
const IDLE_BASE_INTERVAL: Duration = Duration::from_millis(2_500);
/// Added per idle stretch step; the interval grows as the stream stays quiet.
const IDLE_STRETCH_STEP: Duration = Duration::from_millis(500);
/// Stretch steps counted toward the interval (caps it at 5 000 ms).
const IDLE_MAX_STRETCH: u32 = 5;
/// Slack when checking whether a successful edit landed recently enough to
/// skip a rotation.
const IDLE_RECENT_SLACK: Duration = Duration::from_millis(100);

/// Supplies the buttons for idle re-renders. `None` is the finalized
/// sentinel: the turn is over and rotation must stop permanently.
pub trait ButtonSource: Send + Sync {
    fn current_buttons(&self) -> Option<ButtonLayout>;
}

/// Options for one [`StreamingEditor::update_content`] call.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Final renders are sent verbatim (no status line) and are never
    /// discarded as stale.
    pub is_final: bool,
    /// Send with MarkdownV2 parse mode.
    pub markdown: bool,
    pub buttons: Option<ButtonLayout>,
}

/// Raw (unescaped) buffers retained only so a markup parse failure can be
/// retried once with a fully-escaped render.
#[derive(Debug, Clone, Default)]
pub struct RawParts {
    pub thinking: String,
    pub text: String,
}

struct EditorState {
    status_index: usize,
    idle_task: Option<JoinHandle<()>>,
    idle_stretch: u32,
    last_edit_at: Instant,
    edit_in_progress: bool,
    last_content: String,
    raw_parts: Option<RawParts>,
}

struct Shared {
    chat: Chat,
    message_id: String,
    bot: Arc<dyn Bot>,
    editor: MessageEditor,
    buttons: Arc<dyn ButtonSource>,
    /// Monotonic per-message edit counter; the stale-write guard.
    edit_version: AtomicU64,
    stopped: AtomicBool,
    state: Mutex<EditorState>,
}

/// Controller for one live message. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StreamingEditor {
    shared: Arc<Shared>,
}

impl StreamingEditor {
    pub fn new(
        bot: Arc<dyn Bot>,
        limiter: Arc<RateLimiter>,
        buttons: Arc<dyn ButtonSource>,
        chat: Chat,
        message_id: String,
    ) -> Self {
        let now = Instant::now();
        Self {
            shared: Arc::new(Shared {
                chat,
                message_id,
                editor: MessageEditor::new(bot.clone(), limiter),
                bot,
                buttons,
                edit_version: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                state: Mutex::new(EditorState {
                    status_index: 0,
                    idle_task: None,
                    idle_stretch: 0,
                    last_edit_at: now,
                    edit_in_progress: false,
                    last_content: String::new(),
                    raw_parts: None,
                }),
            }),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.shared.message_id
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Last successfully rendered text; empty before the first edit lands.
    pub async fn last_content(&self) -> String {
        self.shared.state.lock().await.last_content.clone()
    }

    /// Registers the raw buffers used by the markup-fallback reconstruction.
    pub async fn set_raw_parts(&self, parts: RawParts) {
        self.shared.state.lock().await.raw_parts = Some(parts);
    }

    /// Arms the idle rotation without waiting for a content render, so a
    /// stream that stalls before its first chunk still cycles the placeholder
    /// status line. No-op once armed or stopped.
    pub async fn arm_idle(&self, markdown: bool) {
        if self.is_stopped() {
            return;
        }
        let mut st = self.shared.state.lock().await;
        if st.idle_task.is_none() {
            schedule_idle(&self.shared, &mut st, markdown);
        }
    }

    /// Renders `content` onto the live message.
    ///
    /// Non-final calls get the current rotating status line appended and may
    /// be discarded when a newer call supersedes them during the rate-limiter
    /// wait (last-writer-wins). Returns whether a write (or an idempotent
    /// no-op) was applied.
    pub async fn update_content(&self, content: &str, opts: &UpdateOptions) -> bool {
        self.update_inner(content, opts, false).await
    }

    /// `from_idle` distinguishes rotation re-renders from caller edits: only
    /// caller edits reset the idle stretch back to the base interval.
    async fn update_inner(&self, content: &str, opts: &UpdateOptions, from_idle: bool) -> bool {
        let shared = &self.shared;
        let captured = shared.edit_version.fetch_add(1, Ordering::SeqCst) + 1;

        let text = {
            let mut st = shared.state.lock().await;
            if let Some(task) = st.idle_task.take() {
                task.abort();
            }
            st.edit_in_progress = true;
            if opts.is_final {
                content.to_string()
            } else {
                render::append_status(content, render::status_line(st.status_index))
            }
        };

        shared.editor.wait_turn(shared.chat.id).await;

        if self.discarded(captured, opts.is_final) {
            debug!(
                message_id = %shared.message_id,
                version = captured,
                "Discarding superseded edit"
            );
            return false;
        }

        let message_opts = MessageOptions {
            markdown: opts.markdown,
            buttons: opts.buttons.clone(),
        };
        let last = { shared.state.lock().await.last_content.clone() };
        let last_rendered = (!last.is_empty()).then_some(last.as_str());

        match shared
            .editor
            .apply(&shared.chat, &shared.message_id, &text, &message_opts, last_rendered)
            .await
        {
            Ok(outcome) => {
                self.after_success(captured, text, outcome, opts, from_idle).await;
                true
            }
            Err(EditFailure::Parse(message)) => {
                self.retry_with_safe_render(captured, &message, &message_opts, opts, from_idle)
                    .await
            }
            Err(e) => {
                error!(error = %e, message_id = %shared.message_id, "Failed to edit message");
                self.clear_in_progress(captured).await;
                false
            }
        }
    }

    /// One-shot recovery from a markup parse failure: re-render the raw parts
    /// fully escaped and retry once with the same captured version.
    async fn retry_with_safe_render(
        &self,
        captured: u64,
        parse_error: &str,
        message_opts: &MessageOptions,
        opts: &UpdateOptions,
        from_idle: bool,
    ) -> bool {
        let shared = &self.shared;
        let (raw, status_index) = {
            let st = shared.state.lock().await;
            (st.raw_parts.clone(), st.status_index)
        };
        let Some(raw) = raw else {
            warn!(
                error = %parse_error,
                message_id = %shared.message_id,
                "Markup parse failure with no raw parts registered, giving up"
            );
            self.clear_in_progress(captured).await;
            return false;
        };

        warn!(
            error = %parse_error,
            message_id = %shared.message_id,
            "Markup parse failure, retrying once with escaped render"
        );

        let body = render::safe_render(&raw.thinking, &raw.text);
        let text = if opts.is_final {
            body
        } else {
            render::append_status(&body, render::status_line(status_index))
        };

        if self.discarded(captured, opts.is_final) {
            return false;
        }

        match shared
            .editor
            .apply(&shared.chat, &shared.message_id, &text, message_opts, None)
            .await
        {
            Ok(outcome) => {
                self.after_success(captured, text, outcome, opts, from_idle).await;
                true
            }
            Err(e) => {
                error!(error = %e, message_id = %shared.message_id, "Escaped retry failed");
                self.clear_in_progress(captured).await;
                false
            }
        }
    }

    /// Stale-write guard: a stopped editor or a newer version discards this
    /// edit unless it is final.
    fn discarded(&self, captured: u64, is_final: bool) -> bool {
        if is_final {
            return false;
        }
        self.shared.stopped.load(Ordering::SeqCst)
            || self.shared.edit_version.load(Ordering::SeqCst) != captured
    }

    async fn after_success(
        &self,
        captured: u64,
        rendered: String,
        outcome: EditOutcome,
        opts: &UpdateOptions,
        from_idle: bool,
    ) {
        let shared = &self.shared;
        let mut st = shared.state.lock().await;
        st.last_content = rendered;
        if outcome == EditOutcome::Written {
            st.last_edit_at = Instant::now();
        }
        // A newer edit owns the in-progress flag and the idle timer now.
        if shared.edit_version.load(Ordering::SeqCst) != captured {
            return;
        }
        st.edit_in_progress = false;
        // Real content arrived: the stream is live again, so the rotation
        // drops back to the base interval.
        if !from_idle {
            st.idle_stretch = 0;
        }
        if !opts.is_final && !shared.stopped.load(Ordering::SeqCst) {
            schedule_idle(shared, &mut st, opts.markdown);
        }
    }

    async fn clear_in_progress(&self, captured: u64) {
        if self.shared.edit_version.load(Ordering::SeqCst) == captured {
            self.shared.state.lock().await.edit_in_progress = false;
        }
    }

    /// Stops the editor: any in-flight wait discards its edit at the next
    /// check, and no further idle rotation fires.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.edit_version.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.shared.state.lock().await.idle_task.take() {
            task.abort();
        }
    }

    /// Stops the editor and deletes the underlying message.
    pub async fn delete(&self) -> streambot_core::Result<()> {
        self.stop().await;
        self.shared
            .bot
            .delete_message(&self.shared.chat, &self.shared.message_id)
            .await
    }
}

/// Idle interval for the current stretch count.
fn idle_interval(stretch: u32) -> Duration {
    IDLE_BASE_INTERVAL + IDLE_STRETCH_STEP * stretch.min(IDLE_MAX_STRETCH)
}

/// Arms the idle timer. Caller holds the state lock.
fn schedule_idle(shared: &Arc<Shared>, st: &mut EditorState, markdown: bool) {
    let interval = idle_interval(st.idle_stretch);
    let expected = shared.edit_version.load(Ordering::SeqCst);
    st.idle_task = Some(tokio::spawn(idle_tick(
        shared.clone(),
        expected,
        interval,
        markdown,
    )));
}

/// One tick of the idle rotation. Boxed so the tick → update → reschedule
/// cycle does not produce an infinitely-sized future type.
fn idle_tick(
    shared: Arc<Shared>,
    expected: u64,
    interval: Duration,
    markdown: bool,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::time::sleep(interval).await;

        if shared.stopped.load(Ordering::SeqCst)
            || shared.edit_version.load(Ordering::SeqCst) != expected
        {
            return;
        }

        {
            let mut st = shared.state.lock().await;
            if st.edit_in_progress {
                // A real edit is in flight; come back later without acting.
                schedule_idle(&shared, &mut st, markdown);
                return;
            }
            if st.last_edit_at.elapsed() + IDLE_RECENT_SLACK < interval {
                // A successful edit landed recently; push the timer out.
                schedule_idle(&shared, &mut st, markdown);
                return;
            }
        }

        let Some(buttons) = shared.buttons.current_buttons() else {
            // Finalized while we slept; rotation ends permanently.
            debug!(message_id = %shared.message_id, "Idle rotation stopping, turn finalized");
            shared.stopped.store(true, Ordering::SeqCst);
            return;
        };

        let body = {
            let mut st = shared.state.lock().await;
            st.status_index = (st.status_index + 1) % render::STATUS_LINES.len();
            st.idle_stretch += 1;
            render::strip_status_line(&st.last_content).to_string()
        };

        let editor = StreamingEditor { shared };
        let opts = UpdateOptions {
            is_final: false,
            markdown,
            buttons: Some(buttons),
        };
        editor.update_inner(&body, &opts, true).await;
    })
}
