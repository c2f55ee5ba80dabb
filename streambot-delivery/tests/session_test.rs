//! End-to-end tests for [`Session`] and the delivery loop: streaming a turn
//! to completion, message-ceiling overflow, abort, retry versioning, version
//! paging, and the error path.

mod common;

use common::mock_bot::MockBot;
use std::sync::Arc;
use std::time::Duration;
use streambot_core::{ButtonState, Chat, Citation, ImagePayload, StreamChunk};
use streambot_delivery::render;
use streambot_delivery::{
    run_delivery_loop, FinalizeOptions, RateLimiter, Session, SessionDeps, VersionDirection,
};
use streambot_storage::{MemoryResponseStore, ResponseRecord, ResponseStore, VersionRecord};
use tokio::sync::mpsc;

fn deps(bot: Arc<MockBot>) -> SessionDeps {
    SessionDeps {
        bot,
        limiter: Arc::new(RateLimiter::new()),
        store: Arc::new(MemoryResponseStore::new()),
    }
}

fn chat() -> Chat {
    Chat::new(1)
}

/// **Test: a simple turn streams, renders live with a status line, and
/// finalizes with the clean text, one version, and no buttons.**
#[tokio::test(start_paused = true)]
async fn simple_turn_streams_and_finalizes() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());
    let mut session = Session::start_new(deps.clone(), chat(), "99", false)
        .await
        .unwrap();

    let answer = "The answer is that both halves of the plan work together.";
    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(StreamChunk::Thinking("thinking hard".to_string()))
        .unwrap();
    tx.send(StreamChunk::Text(answer.to_string())).unwrap();
    tx.send(StreamChunk::Done).unwrap();

    let state = run_delivery_loop(&mut session, &mut rx).await.unwrap();
    assert_eq!(state, ButtonState::None);

    // Placeholder went out with a status line and a stop button.
    let calls = bot.calls();
    assert!(matches!(
        &calls[0],
        common::mock_bot::BotCall::Send { text, has_buttons: true, .. }
            if text == render::STATUS_LINES[0]
    ));

    // One live render (status appended), one final render (status-free).
    let edits = bot.edits_for("100");
    assert_eq!(edits.len(), 2);
    assert!(edits[0].starts_with("> thinking hard"));
    assert!(edits[0].contains(answer));
    assert!(edits[0].contains(render::STATUS_LINES[0]));
    assert!(edits[1].starts_with("> thinking hard"));
    assert!(edits[1].ends_with(answer));

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert_eq!(record.versions.len(), 1);
    assert_eq!(record.button_state, ButtonState::None);
    assert_eq!(record.versions[0].text, answer);
    assert_eq!(record.versions[0].thinking, "thinking hard");
    assert!(!record.versions[0].stopped_by_user);

    let latest = deps.store.get_latest_text("100").await.unwrap().unwrap();
    assert_eq!(latest.text, answer);
}

/// **Test: the placeholder's status line rotates while the stream is quiet,
/// before any content has been rendered.**
#[tokio::test(start_paused = true)]
async fn placeholder_rotates_while_stream_is_quiet() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());
    let _session = Session::start_new(deps, chat(), "99", false).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    let edits = bot.edits_for("100");
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0], render::STATUS_LINES[1]);
}

/// **Test: content past the safe ceiling opens a continuation message, and
/// the persisted version keeps the full text across both messages.**
#[tokio::test(start_paused = true)]
async fn overflow_opens_continuation_message() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());
    let mut session = Session::start_new(deps.clone(), chat(), "99", false)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let chunk = "a".repeat(100);
    for _ in 0..45 {
        tx.send(StreamChunk::Text(chunk.clone())).unwrap();
    }
    tx.send(StreamChunk::Done).unwrap();

    let state = run_delivery_loop(&mut session, &mut rx).await.unwrap();
    assert_eq!(state, ButtonState::None);

    assert_eq!(session.message_ids(), &["100".to_string(), "101".to_string()]);

    // The closed head message got a final, status-free render that fills the
    // safe ceiling; the tail landed in the continuation.
    let head_edits = bot.edits_for("100");
    let head_final = head_edits.last().unwrap();
    assert_eq!(head_final.chars().count(), 3_900);
    assert!(!head_final.contains(render::STATUS_LINES[0]));

    let tail_edits = bot.edits_for("101");
    assert_eq!(tail_edits.last().unwrap(), &"a".repeat(600));

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert_eq!(record.versions[0].text.len(), 4_500);
    assert_eq!(record.versions[0].message_ids.len(), 2);
}

/// **Test: abort preserves the partial answer, appends the stopped marker,
/// and finalizes to RetryOnly. Repeat finalize is a no-op.**
#[tokio::test(start_paused = true)]
async fn abort_preserves_partial_and_marks_stopped() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());
    let mut session = Session::start_new(deps.clone(), chat(), "99", false)
        .await
        .unwrap();

    session.append_text("partial answer");
    session.stop();

    let (_tx, mut rx) = mpsc::unbounded_channel::<StreamChunk>();
    let state = run_delivery_loop(&mut session, &mut rx).await.unwrap();
    assert_eq!(state, ButtonState::RetryOnly);

    let edits = bot.edits_for("100");
    let final_edit = edits.last().unwrap();
    assert!(final_edit.contains("partial answer"));
    assert!(final_edit.ends_with(render::STOPPED_MARKER));

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert!(record.versions[0].stopped_by_user);
    assert_eq!(record.button_state, ButtonState::RetryOnly);

    // Finalize is exactly-once: a second call returns the same state and
    // performs no further platform calls.
    let edit_count = bot.edits().len();
    let again = session.finalize(FinalizeOptions::default()).await.unwrap();
    assert_eq!(again, ButtonState::RetryOnly);
    assert_eq!(bot.edits().len(), edit_count);
}

/// **Test: a retry reuses the anchor message, appends a second version, and
/// flips the buttons to version paging.**
#[tokio::test(start_paused = true)]
async fn retry_appends_second_version() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());

    let mut first = Session::start_new(deps.clone(), chat(), "99", false)
        .await
        .unwrap();
    first.append_text("first answer");
    first.finalize(FinalizeOptions::default()).await.unwrap();

    let mut retry = Session::start_retry(deps.clone(), chat(), "100", false)
        .await
        .unwrap();
    assert!(retry.is_retry());
    assert_eq!(retry.turn_id(), "100");

    // The anchor was reset to a placeholder, not deleted.
    assert!(bot.deletes().is_empty());
    assert_eq!(
        bot.edits_for("100").last().unwrap(),
        render::STATUS_LINES[0]
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(StreamChunk::Text("second answer".to_string()))
        .unwrap();
    tx.send(StreamChunk::Done).unwrap();
    let state = run_delivery_loop(&mut retry, &mut rx).await.unwrap();
    assert_eq!(state, ButtonState::HasVersions);

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert_eq!(record.versions.len(), 2);
    assert_eq!(record.current_version_index, 1);
    assert_eq!(record.versions[1].text, "second answer");
    assert_eq!(record.button_state, ButtonState::HasVersions);
    assert_eq!(record.anchor_message_id, "100");
}

fn stored_version(id: u32, text: &str, message_ids: &[&str]) -> VersionRecord {
    VersionRecord {
        version_id: id,
        created_at: chrono::Utc::now(),
        message_ids: message_ids.iter().map(|s| s.to_string()).collect(),
        text: text.to_string(),
        thinking: String::new(),
        citations: Vec::new(),
        error: None,
        stopped_by_user: false,
        image_base64: None,
        model_parts: None,
    }
}

/// **Test: version paging deletes the displayed version's extra messages,
/// re-renders the target onto the stable anchor, and validates bounds.**
#[tokio::test(start_paused = true)]
async fn switch_version_pages_and_validates_bounds() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());

    let mut record = ResponseRecord::new("100", 1, "99", "100");
    record.push_version(stored_version(1, "first answer", &["100"]));
    record.push_version(stored_version(2, "second answer", &["100", "150"]));
    record.button_state = ButtonState::HasVersions;
    deps.store.create_response(&record).await.unwrap();

    // Already displaying the latest version.
    assert!(
        Session::switch_version(&deps, chat(), "100", VersionDirection::Next, false)
            .await
            .is_err()
    );

    let state = Session::switch_version(&deps, chat(), "100", VersionDirection::Prev, false)
        .await
        .unwrap();
    assert_eq!(state, ButtonState::HasVersions);

    // The second version's extra message went away; the anchor survived.
    assert_eq!(bot.deletes(), vec!["150".to_string()]);
    let edits = bot.edits_for("100");
    assert!(edits.last().unwrap().contains("first answer"));

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert_eq!(record.current_version_index, 0);
    assert_eq!(record.versions[0].message_ids, vec!["100".to_string()]);

    // Now at the first version.
    assert!(
        Session::switch_version(&deps, chat(), "100", VersionDirection::Prev, false)
            .await
            .is_err()
    );
}

/// **Test: a mid-stream error keeps the partial answer, appends a delimited
/// error suffix, and offers a retry.**
#[tokio::test(start_paused = true)]
async fn handle_error_keeps_partial_with_suffix() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());
    let mut session = Session::start_new(deps.clone(), chat(), "99", false)
        .await
        .unwrap();

    session.append_text("partial");
    let state = session.handle_error("boom").await.unwrap();
    assert_eq!(state, ButtonState::RetryOnly);

    let final_edit = bot.edits_for("100").last().unwrap().clone();
    assert!(final_edit.contains("partial"));
    assert!(final_edit.contains("⚠️ Error: boom"));

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert_eq!(record.versions[0].error.as_deref(), Some("boom"));
    assert_eq!(record.button_state, ButtonState::RetryOnly);
}

/// **Test: images and citations collected during the turn land in the final
/// render and the persisted version.**
#[tokio::test(start_paused = true)]
async fn image_and_citations_survive_finalize() {
    let bot = MockBot::new();
    let deps = deps(bot.clone());
    let mut session = Session::start_new(deps.clone(), chat(), "99", false)
        .await
        .unwrap();

    session.append_text("see the chart");
    session.add_citation(Citation {
        title: Some("Docs".to_string()),
        url: "https://docs.example".to_string(),
    });
    session.add_image(ImagePayload {
        data_base64: "aGVsbG8=".to_string(),
        mime_type: "image/png".to_string(),
    });

    let state = session.finalize(FinalizeOptions::default()).await.unwrap();
    assert_eq!(state, ButtonState::None);

    let final_edit = bot.edits_for("100").last().unwrap().clone();
    assert!(final_edit.contains("see the chart"));
    assert!(final_edit.contains("https://docs.example"));
    assert_eq!(bot.photo_count(), 1);

    let record = deps.store.get_response("100").await.unwrap().unwrap();
    assert_eq!(record.versions[0].citations.len(), 1);
    assert_eq!(record.versions[0].image_base64.as_deref(), Some("aGVsbG8="));
    // The photo's message id joins the version's message chain.
    assert_eq!(record.versions[0].message_ids.len(), 2);
}
