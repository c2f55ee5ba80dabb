//! Bot-message session: the full lifecycle of one user turn.
//!
//! Owns the stream buffers, the chain of message ids used when the answer
//! overflows one message, the cancellation handle, and the persisted version
//! history with its button-state machine.
//!
//! Lifecycle: `ACTIVE → FINALIZING → FINALIZED` (terminal), with an
//! orthogonal abort flag settable from `ACTIVE` at any time. Buffer mutation
//! is legal only while `ACTIVE`; `finalize` is exactly-once.

use crate::message_editor::MessageEditor;
use crate::rate_limiter::RateLimiter;
use crate::render;
use crate::splitter::{smart_split, SplitResult};
use crate::streaming_editor::{ButtonSource, RawParts, StreamingEditor, UpdateOptions};
use base64::Engine;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streambot_core::{
    keyboard_for, Bot, ButtonLayout, ButtonState, Chat, Citation, ImagePayload, MessageOptions,
    Result, StreamBotError,
};
use streambot_storage::{ResponseRecord, ResponseStore, VersionRecord};
use tracing::{debug, error, info, warn};

/// Safe per-message display ceiling: 50 chars of margin under the platform's
/// hard 4 096-char limit, spent on markup decoration and markers.
pub const SAFE_MESSAGE_LEN: usize = 3_900;
/// The platform's hard per-message ceiling.
pub const MAX_MESSAGE_LEN: usize = 4_096;

/// Dependencies injected into every session; no ambient singletons.
#[derive(Clone)]
pub struct SessionDeps {
    pub bot: Arc<dyn Bot>,
    pub limiter: Arc<RateLimiter>,
    pub store: Arc<dyn ResponseStore>,
}

/// Cooperative cancellation handle: set from anywhere, observed at loop
/// boundaries only. Never preempts an in-flight platform call.
#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Options for [`Session::finalize`].
#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    pub stopped_by_user: bool,
    pub error: Option<String>,
    /// Opaque provider continuation data persisted with the version.
    pub model_parts: Option<serde_json::Value>,
}

/// Version paging direction for [`Session::switch_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDirection {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Finalizing,
    Finalized,
}

/// Button source handed to the streaming editor: `Processing` buttons while
/// the turn runs, the finalized sentinel (`None`) afterwards.
struct SessionButtons {
    finalized: Arc<AtomicBool>,
}

impl ButtonSource for SessionButtons {
    fn current_buttons(&self) -> Option<ButtonLayout> {
        if self.finalized.load(Ordering::SeqCst) {
            None
        } else {
            keyboard_for(ButtonState::Processing, 0, 0)
        }
    }
}

/// One user turn (or one retry of it).
pub struct Session {
    deps: SessionDeps,
    chat: Chat,
    source_message_id: String,
    /// Stable turn anchor; the first message id, never deleted or recreated.
    turn_id: String,
    message_ids: Vec<String>,
    text: String,
    thinking: String,
    images: Vec<ImagePayload>,
    citations: Vec<Citation>,
    /// Byte offset into `text` where the current message's slice begins.
    text_offset: usize,
    /// Byte offset into `thinking` where the current message's slice begins.
    thinking_offset: usize,
    abort: AbortHandle,
    is_retry: bool,
    finalized_flag: Arc<AtomicBool>,
    state: SessionState,
    final_button_state: Option<ButtonState>,
    editor: StreamingEditor,
    markdown: bool,
}

impl Session {
    /// Starts a fresh turn: sends the placeholder message, creates the
    /// persisted response record, and binds a streaming editor to the anchor.
    pub async fn start_new(
        deps: SessionDeps,
        chat: Chat,
        source_message_id: impl Into<String>,
        markdown: bool,
    ) -> Result<Self> {
        let source_message_id = source_message_id.into();
        let placeholder_opts = MessageOptions {
            markdown: false,
            buttons: keyboard_for(ButtonState::Processing, 0, 0),
        };
        let anchor_id = deps
            .bot
            .send_message(&chat, render::status_line(0), &placeholder_opts)
            .await?;

        let record = ResponseRecord::new(&anchor_id, chat.id, &source_message_id, &anchor_id);
        deps.store
            .create_response(&record)
            .await
            .map_err(|e| StreamBotError::Storage(e.to_string()))?;

        info!(chat_id = chat.id, turn_id = %anchor_id, "Started new turn");
        let session = Self::build(deps, chat, source_message_id, anchor_id, false, markdown);
        // The placeholder must rotate even if the stream stalls before its
        // first chunk.
        session.editor.arm_idle(markdown).await;
        Ok(session)
    }

    /// Starts a retry for an existing turn: deletes the displayed version's
    /// non-anchor messages, resets the anchor to a placeholder, and streams
    /// into it again. The anchor id stays stable across retries.
    pub async fn start_retry(
        deps: SessionDeps,
        chat: Chat,
        turn_id: &str,
        markdown: bool,
    ) -> Result<Self> {
        let record = deps
            .store
            .get_response(turn_id)
            .await
            .map_err(|e| StreamBotError::Storage(e.to_string()))?
            .ok_or_else(|| StreamBotError::Session(format!("Unknown turn: {}", turn_id)))?;

        if let Some(version) = record.current_version() {
            delete_non_anchor_messages(&deps, &chat, version, &record.anchor_message_id).await;
        }

        let placeholder_opts = MessageOptions {
            markdown: false,
            buttons: keyboard_for(ButtonState::Processing, 0, 0),
        };
        let editor = MessageEditor::new(deps.bot.clone(), deps.limiter.clone());
        if let Err(e) = editor
            .edit(
                &chat,
                &record.anchor_message_id,
                render::status_line(0),
                &placeholder_opts,
                None,
            )
            .await
        {
            warn!(error = %e, turn_id, "Failed to reset anchor for retry");
        }

        info!(chat_id = chat.id, turn_id, version_count = record.versions.len(), "Started retry");
        let session = Self::build(
            deps,
            chat,
            record.source_message_id.clone(),
            record.anchor_message_id.clone(),
            true,
            markdown,
        );
        session.editor.arm_idle(markdown).await;
        Ok(session)
    }

    fn build(
        deps: SessionDeps,
        chat: Chat,
        source_message_id: String,
        anchor_id: String,
        is_retry: bool,
        markdown: bool,
    ) -> Self {
        let finalized_flag = Arc::new(AtomicBool::new(false));
        let buttons: Arc<dyn ButtonSource> = Arc::new(SessionButtons {
            finalized: finalized_flag.clone(),
        });
        let editor = StreamingEditor::new(
            deps.bot.clone(),
            deps.limiter.clone(),
            buttons,
            chat,
            anchor_id.clone(),
        );
        Self {
            deps,
            chat,
            source_message_id,
            turn_id: anchor_id.clone(),
            message_ids: vec![anchor_id],
            text: String::new(),
            thinking: String::new(),
            images: Vec::new(),
            citations: Vec::new(),
            text_offset: 0,
            thinking_offset: 0,
            abort: AbortHandle::new(),
            is_retry,
            finalized_flag,
            state: SessionState::Active,
            final_button_state: None,
            editor,
            markdown,
        }
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn message_ids(&self) -> &[String] {
        &self.message_ids
    }

    pub fn current_message_id(&self) -> &str {
        self.message_ids
            .last()
            .map(String::as_str)
            .unwrap_or(&self.turn_id)
    }

    pub fn is_retry(&self) -> bool {
        self.is_retry
    }

    /// Cancellation handle for this turn; cloneable into button callbacks.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Sets the abort flag. Does not finalize: the chunk-stream consumer is
    /// expected to observe the flag, break out, and call `finalize` so that
    /// partial content is preserved and marked stopped.
    pub fn stop(&self) {
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn append_text(&mut self, s: &str) {
        if self.is_active() {
            self.text.push_str(s);
        }
    }

    pub fn append_thinking(&mut self, s: &str) {
        if self.is_active() {
            self.thinking.push_str(s);
        }
    }

    pub fn add_image(&mut self, image: ImagePayload) {
        if self.is_active() {
            self.images.push(image);
        }
    }

    pub fn add_citation(&mut self, citation: Citation) {
        if self.is_active() {
            self.citations.push(citation);
        }
    }

    fn current_thinking(&self) -> &str {
        &self.thinking[self.thinking_offset..]
    }

    fn current_text(&self) -> &str {
        &self.text[self.text_offset..]
    }

    /// Display body for the current (last) message in the chain.
    fn current_display(&self) -> String {
        render::render_body(self.current_thinking(), self.current_text())
    }

    /// Whether the formatted display of the current message would exceed the
    /// safe threshold, so a continuation message must be opened.
    pub fn needs_continuation(&self) -> bool {
        render::display_len(&self.current_display()) > SAFE_MESSAGE_LEN
    }

    /// Renders the current buffers onto the live message (non-final).
    pub async fn render_live(&mut self) -> bool {
        self.editor
            .set_raw_parts(RawParts {
                thinking: self.current_thinking().to_string(),
                text: self.current_text().to_string(),
            })
            .await;
        let body = self.current_display();
        let opts = UpdateOptions {
            is_final: false,
            markdown: self.markdown,
            buttons: keyboard_for(ButtonState::Processing, 0, 0),
        };
        self.editor.update_content(&body, &opts).await
    }

    /// Closes the current message with a final render of the part that fits
    /// and opens a continuation message for the rest.
    ///
    /// If the thinking block alone exceeds the ceiling, the thinking is split
    /// first and all answer text is deferred; otherwise the answer text is
    /// split to fit the space left after the thinking block.
    pub async fn create_continuation_message(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(StreamBotError::Session(
                "continuation on a finalized session".to_string(),
            ));
        }

        let thinking_rest = self.current_thinking();
        let text_rest = self.current_text();

        let (head_thinking, head_text);
        if render::quoted_len(thinking_rest) > SAFE_MESSAGE_LEN {
            let split = split_thinking_to_fit(thinking_rest, SAFE_MESSAGE_LEN);
            self.thinking_offset += split.current.len();
            head_thinking = split.current;
            head_text = String::new();
        } else {
            let used = render::quoted_len(thinking_rest)
                + if thinking_rest.is_empty() { 0 } else { 2 };
            let budget = SAFE_MESSAGE_LEN.saturating_sub(used).max(1);
            let split = smart_split(text_rest, budget);
            head_thinking = thinking_rest.to_string();
            head_text = split.current;
            self.thinking_offset = self.thinking.len();
            self.text_offset += head_text.len();
        }

        // The predecessor gets its final, status-free render before the
        // continuation opens.
        let head_body = render::render_body(&head_thinking, &head_text);
        let opts = UpdateOptions {
            is_final: true,
            markdown: self.markdown,
            buttons: None,
        };
        self.editor.update_content(&head_body, &opts).await;

        let placeholder_opts = MessageOptions {
            markdown: false,
            buttons: keyboard_for(ButtonState::Processing, 0, 0),
        };
        let new_id = self
            .deps
            .bot
            .send_message(&self.chat, render::status_line(0), &placeholder_opts)
            .await?;
        debug!(turn_id = %self.turn_id, new_message_id = %new_id, "Opened continuation message");

        self.message_ids.push(new_id.clone());
        let buttons: Arc<dyn ButtonSource> = Arc::new(SessionButtons {
            finalized: self.finalized_flag.clone(),
        });
        self.editor = StreamingEditor::new(
            self.deps.bot.clone(),
            self.deps.limiter.clone(),
            buttons,
            self.chat,
            new_id,
        );
        self.editor.arm_idle(self.markdown).await;
        Ok(())
    }

    /// Finalizes the turn: builds a version from the buffers, appends it to
    /// the persisted history, recomputes the button state, renders the final
    /// content, and releases the session. Idempotent: repeat calls are no-ops
    /// returning the first result.
    pub async fn finalize(&mut self, opts: FinalizeOptions) -> Result<ButtonState> {
        if !self.is_active() {
            return Ok(self.final_button_state.unwrap_or(ButtonState::None));
        }
        self.state = SessionState::Finalizing;
        // Flips the button source to the finalized sentinel, which also ends
        // idle rotation at its next fire.
        self.finalized_flag.store(true, Ordering::SeqCst);

        if opts.stopped_by_user && !self.text.ends_with(render::STOPPED_MARKER) {
            if !self.text.is_empty() {
                self.text.push_str("\n\n");
            }
            self.text.push_str(render::STOPPED_MARKER);
        }

        let mut record = match self
            .deps
            .store
            .get_response(&self.turn_id)
            .await
            .map_err(|e| StreamBotError::Storage(e.to_string()))?
        {
            Some(record) => record,
            None => {
                // The record vanished; the turn still ends, only unpersisted.
                error!(turn_id = %self.turn_id, "Response record missing at finalize");
                ResponseRecord::new(&self.turn_id, self.chat.id, &self.source_message_id, &self.turn_id)
            }
        };

        let stopped_or_errored = opts.stopped_by_user || opts.error.is_some();
        let version_count = record.versions.len() + 1;
        let button_state = ButtonState::on_finalize(version_count, stopped_or_errored);
        let keyboard = keyboard_for(button_state, version_count, version_count);

        let mut body = self.current_display();
        body.push_str(&render::render_citations(&self.citations));
        if let Some(message) = &opts.error {
            body.push_str(&render::error_suffix(message));
        }
        self.render_final(body, keyboard).await?;

        if let Some(image) = self.images.first().cloned() {
            self.send_image(&image).await;
        }

        let version = VersionRecord {
            version_id: version_count as u32,
            created_at: Utc::now(),
            message_ids: self.message_ids.clone(),
            text: self.text.clone(),
            thinking: self.thinking.clone(),
            citations: self.citations.clone(),
            error: opts.error.clone(),
            stopped_by_user: opts.stopped_by_user,
            image_base64: self.images.first().map(|i| i.data_base64.clone()),
            model_parts: opts.model_parts,
        };
        record.push_version(version);
        record.button_state = button_state;

        // A failed persistence write is fatal to the turn but must not keep
        // the session alive.
        if let Err(e) = self.deps.store.save_response(&record).await {
            error!(error = %e, turn_id = %self.turn_id, "Failed to persist response record");
        } else if let Err(e) = self
            .deps
            .store
            .save_latest_text(
                &self.turn_id,
                &self.text,
                self.images.first().map(|i| i.data_base64.as_str()),
            )
            .await
        {
            error!(error = %e, turn_id = %self.turn_id, "Failed to persist latest text");
        }

        self.editor.stop().await;
        self.state = SessionState::Finalized;
        self.final_button_state = Some(button_state);
        info!(
            turn_id = %self.turn_id,
            versions = version_count,
            button_state = ?button_state,
            stopped = opts.stopped_by_user,
            "Turn finalized"
        );
        Ok(button_state)
    }

    /// Error path of finalize: the live message keeps the accumulated partial
    /// answer with a delimited error suffix and a retry affordance.
    pub async fn handle_error(&mut self, message: &str) -> Result<ButtonState> {
        warn!(turn_id = %self.turn_id, error = message, "Turn failed, finalizing with error");
        self.finalize(FinalizeOptions {
            stopped_by_user: false,
            error: Some(message.to_string()),
            model_parts: None,
        })
        .await
    }

    /// Final render of `body` onto the current message, splitting into extra
    /// continuation messages when it no longer fits one.
    async fn render_final(
        &mut self,
        body: String,
        keyboard: Option<ButtonLayout>,
    ) -> Result<()> {
        let split = smart_split(&body, SAFE_MESSAGE_LEN);
        let first_is_last = split.remaining.is_empty();
        let opts = UpdateOptions {
            is_final: true,
            markdown: self.markdown,
            buttons: if first_is_last { keyboard.clone() } else { None },
        };
        self.editor.update_content(&split.current, &opts).await;

        let mut rest = split.remaining;
        while !rest.is_empty() {
            let split = smart_split(&rest, SAFE_MESSAGE_LEN);
            let is_last = split.remaining.is_empty();
            let send_opts = MessageOptions {
                markdown: self.markdown,
                buttons: if is_last { keyboard.clone() } else { None },
            };
            let id = self
                .deps
                .bot
                .send_message(&self.chat, &split.current, &send_opts)
                .await?;
            self.message_ids.push(id);
            rest = split.remaining;
        }
        Ok(())
    }

    async fn send_image(&mut self, image: &ImagePayload) {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(&image.data_base64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, turn_id = %self.turn_id, "Invalid image payload, skipping");
                return;
            }
        };
        match self.deps.bot.send_photo(&self.chat, bytes, None).await {
            Ok(id) => self.message_ids.push(id),
            Err(e) => warn!(error = %e, turn_id = %self.turn_id, "Failed to send image"),
        }
    }

    /// Pages a finalized turn to its previous or next version.
    ///
    /// Deletes the non-anchor messages of the displayed version, re-renders
    /// the target version (re-splitting if it no longer fits one message),
    /// re-sends its image, updates the current index, and re-persists. The
    /// anchor message is never deleted or recreated.
    pub async fn switch_version(
        deps: &SessionDeps,
        chat: Chat,
        turn_id: &str,
        direction: VersionDirection,
        markdown: bool,
    ) -> Result<ButtonState> {
        let mut record = deps
            .store
            .get_response(turn_id)
            .await
            .map_err(|e| StreamBotError::Storage(e.to_string()))?
            .ok_or_else(|| StreamBotError::Session(format!("Unknown turn: {}", turn_id)))?;

        let current = record.current_version_index;
        let target = match direction {
            VersionDirection::Prev => current
                .checked_sub(1)
                .ok_or_else(|| StreamBotError::Session("Already at first version".to_string()))?,
            VersionDirection::Next => {
                if current + 1 >= record.versions.len() {
                    return Err(StreamBotError::Session(
                        "Already at latest version".to_string(),
                    ));
                }
                current + 1
            }
        };

        if let Some(version) = record.versions.get(current) {
            delete_non_anchor_messages(deps, &chat, version, &record.anchor_message_id).await;
        }

        let version = &record.versions[target];
        let body = compose_version_body(version);
        let total = record.versions.len();
        let keyboard = keyboard_for(ButtonState::HasVersions, target + 1, total);

        let editor = MessageEditor::new(deps.bot.clone(), deps.limiter.clone());
        let mut used_ids = vec![record.anchor_message_id.clone()];

        let mut rest = body;
        let mut first = true;
        loop {
            let split = smart_split(&rest, SAFE_MESSAGE_LEN);
            let is_last = split.remaining.is_empty();
            let buttons = if is_last { keyboard.clone() } else { None };
            if first {
                let opts = MessageOptions { markdown, buttons };
                if let Err(e) = editor
                    .edit(&chat, &record.anchor_message_id, &split.current, &opts, None)
                    .await
                {
                    error!(error = %e, turn_id, "Failed to re-render anchor on version switch");
                }
                first = false;
            } else {
                let opts = MessageOptions { markdown, buttons };
                let id = deps.bot.send_message(&chat, &split.current, &opts).await?;
                used_ids.push(id);
            }
            if is_last {
                break;
            }
            rest = split.remaining;
        }

        if let Some(image) = &version.image_base64 {
            match base64::engine::general_purpose::STANDARD.decode(image) {
                Ok(bytes) => match deps.bot.send_photo(&chat, bytes, None).await {
                    Ok(id) => used_ids.push(id),
                    Err(e) => warn!(error = %e, turn_id, "Failed to re-send image"),
                },
                Err(e) => warn!(error = %e, turn_id, "Invalid persisted image payload"),
            }
        }

        record.versions[target].message_ids = used_ids;
        record.current_version_index = target;
        record.button_state = ButtonState::HasVersions;
        deps.store
            .save_response(&record)
            .await
            .map_err(|e| StreamBotError::Storage(e.to_string()))?;

        info!(turn_id, version = target + 1, total, "Switched displayed version");
        Ok(ButtonState::HasVersions)
    }
}

/// Splits raw thinking so its quoted render fits `limit` chars. The budget
/// shrinks by the observed overflow each pass, so the loop terminates.
fn split_thinking_to_fit(thinking: &str, limit: usize) -> SplitResult {
    let mut budget = limit;
    loop {
        let split = smart_split(thinking, budget);
        let rendered = render::quoted_len(&split.current);
        if rendered <= limit || budget <= 1 {
            return split;
        }
        budget = budget.saturating_sub(rendered - limit).max(1);
    }
}

/// Display body for a persisted version: thinking block, answer text (already
/// carrying any stopped marker), citations, and the error suffix if it failed.
fn compose_version_body(version: &VersionRecord) -> String {
    let mut body = render::render_body(&version.thinking, &version.text);
    body.push_str(&render::render_citations(&version.citations));
    if let Some(message) = &version.error {
        body.push_str(&render::error_suffix(message));
    }
    body
}

/// Deletes every message of `version` except the anchor; failures are logged
/// and skipped so one missing message cannot wedge the switch.
async fn delete_non_anchor_messages(
    deps: &SessionDeps,
    chat: &Chat,
    version: &VersionRecord,
    anchor_id: &str,
) {
    for message_id in &version.message_ids {
        if message_id == anchor_id {
            continue;
        }
        if let Err(e) = deps.bot.delete_message(chat, message_id).await {
            warn!(error = %e, message_id = %message_id, "Failed to delete version message");
        }
    }
}
