mod common;

use common::{assistant_reply, settle, settings, user_turn, FakeBackend, Reply};
use dishchat::api::events::{ChatEvent, EventReceiver};
use dishchat::api::models::Role;
use dishchat::chat::draft::DRAFT_KEY;
use dishchat::error::ChatError;
use dishchat::storage::{DurableSlot, MemorySlot};
use dishchat::ui::{Body, ChatView, RenderedMessage};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn open(backend: &Arc<FakeBackend>) -> (ChatView, EventReceiver, Arc<MemorySlot>) {
    let slot = Arc::new(MemorySlot::new());
    let (view, rx) = ChatView::open(backend.clone(), "chat-1", slot.clone(), &settings());
    (view, rx, slot)
}

fn count_roles(view: &ChatView, role: Role) -> usize {
    view.conversation().snapshot().iter().filter(|m| m.role == role).count()
}

#[tokio::test(start_paused = true)]
async fn sequential_submissions_leave_no_placeholders() {
    let backend = FakeBackend::new();
    let (mut view, _rx, _slot) = open(&backend);

    for text in ["is it spicy?", "any vegan option?", "what to drink with it?"] {
        view.edit(text);
        assert!(view.submit().unwrap());
        settle().await;
        assert!(!view.is_submitting());
    }

    assert_eq!(count_roles(&view, Role::User), 3);
    assert_eq!(count_roles(&view, Role::Assistant), 3);
    assert_eq!(count_roles(&view, Role::Loading), 0);
    assert_eq!(backend.follow_up_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn optimistic_user_is_confirmed_so_refresh_adds_no_duplicate() {
    let backend = FakeBackend::new();
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;
    view.load_history().await.unwrap();
    view.load_history().await.unwrap();

    let ids: Vec<String> = view
        .conversation()
        .snapshot()
        .iter()
        .map(|m| m.message_id.to_string())
        .collect();
    assert_eq!(ids, ["srv-u1", "srv-a1"]);
}

#[tokio::test(start_paused = true)]
async fn second_submit_while_outstanding_is_rejected() {
    let backend = FakeBackend::new();
    let gate = backend.hold_replies();
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("first");
    view.submit().unwrap();
    settle().await;

    view.edit("second");
    assert!(matches!(view.submit(), Err(ChatError::SubmissionInFlight)));
    assert_eq!(view.input(), "second");
    assert_eq!(backend.follow_up_count(), 1);

    gate.notify_one();
    settle().await;
    assert!(!view.is_submitting());
    assert!(view.submit().unwrap());
}

#[tokio::test(start_paused = true)]
async fn whitespace_submission_changes_nothing() {
    let backend = FakeBackend::new();
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("  ");
    assert!(!view.submit().unwrap());
    settle().await;
    assert!(view.conversation().snapshot().is_empty());
    assert_eq!(backend.follow_up_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_error_keeps_text_and_allows_resubmission() {
    let backend = FakeBackend::new();
    backend.script(Reply::Transport);
    let (mut view, mut rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;

    let log = view.conversation().snapshot();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].role, Role::User);
    assert_eq!(log[0].content.user_query(), Some("is it spicy?"));
    assert!(!view.is_submitting());
    assert!(view.error().is_some());
    assert_eq!(view.conversation().pending(), None);

    let mut banner = None;
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::Error(text) = event {
            banner = Some(text);
        }
    }
    assert!(banner.is_some());
    view.dismiss_error();
    assert!(view.error().is_none());

    view.edit("is it spicy?");
    assert!(view.submit().unwrap());
    settle().await;
    assert_eq!(count_roles(&view, Role::Assistant), 1);
    assert_eq!(count_roles(&view, Role::Loading), 0);
}

fn banners(rx: &mut EventReceiver) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::Error(text) = event {
            out.push(text);
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn malformed_reply_appends_nothing_and_shows_error() {
    let backend = FakeBackend::new();
    backend.script(Reply::Malformed);
    let (mut view, mut rx, _slot) = open(&backend);

    view.edit("hello");
    view.submit().unwrap();
    settle().await;
    assert_eq!(count_roles(&view, Role::User), 1);
    assert_eq!(count_roles(&view, Role::Assistant), 0);
    assert_eq!(count_roles(&view, Role::Loading), 0);
    assert!(!view.is_submitting());
    assert!(view.error().is_some());
    assert_eq!(banners(&mut rx).len(), 1);

    view.dismiss_error();
    assert!(view.error().is_none());
}

const GOOD_REPLY: &str = r#"{
    "messages": [
        { "messageId": "srv-u1", "chatId": "chat-1", "createdAt": "2024-12-01T10:00:00",
          "role": "user", "content": { "user_query": "is it spicy?" } },
        { "messageId": "srv-a1", "chatId": "chat-1", "createdAt": "2024-12-01T10:00:02",
          "role": "assistant",
          "content": {
              "user_query": "is it spicy?",
              "restaurant_name": "Sichuan House",
              "dish_name": "Mapo Tofu",
              "beverages": ["jasmine tea"]
          } }
    ]
}"#;

fn shown_keys(message: &RenderedMessage) -> Vec<&str> {
    match &message.body {
        Body::Sections { shown, .. } => shown.iter().map(|s| s.key()).collect(),
        _ => Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn wire_reply_reveals_in_backend_field_order() {
    let backend = FakeBackend::new();
    backend.script(Reply::Wire(GOOD_REPLY.to_string()));
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;

    let reply = view.render().pop().unwrap();
    assert_eq!(reply.message_id.as_str(), "srv-a1");
    assert_eq!(shown_keys(&reply), ["user_query"]);
    tokio::time::advance(Duration::from_millis(500)).await;
    let reply = view.render().pop().unwrap();
    assert_eq!(shown_keys(&reply), ["user_query", "restaurant_name"]);
    tokio::time::advance(Duration::from_millis(1000)).await;
    let reply = view.render().pop().unwrap();
    assert_eq!(shown_keys(&reply), ["user_query", "restaurant_name", "dish_name", "beverages"]);
}

#[tokio::test(start_paused = true)]
async fn undecodable_reply_does_not_duplicate_user_turn() {
    let bad = GOOD_REPLY.replace(r#""beverages": ["jasmine tea"]"#, r#""ingredients": {"a": 1}"#);
    let backend = FakeBackend::new();
    backend.script(Reply::Wire(bad.clone()));
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;
    assert!(view.error().is_some());
    assert_eq!(view.conversation().pending(), None);

    *backend.history.lock().unwrap() = common::decode_wire(&bad).unwrap();
    view.load_history().await.unwrap();
    let ids: Vec<String> = view
        .conversation()
        .snapshot()
        .iter()
        .map(|m| m.message_id.to_string())
        .collect();
    assert_eq!(ids, ["srv-u1"]);
}

#[tokio::test(start_paused = true)]
async fn http_status_failure_is_surfaced() {
    let backend = FakeBackend::new();
    backend.script(Reply::Status(500));
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("hello");
    view.submit().unwrap();
    settle().await;
    assert!(view.error().unwrap().contains("500"));
    assert_eq!(count_roles(&view, Role::Loading), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_does_not_drop_in_flight_turn() {
    let backend = FakeBackend::with_history(vec![
        user_turn("u0", "what is it?"),
        assistant_reply("a0", "what is it?"),
    ]);
    let gate = backend.hold_replies();
    let (mut view, _rx, _slot) = open(&backend);
    view.load_history().await.unwrap();

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;

    // Snapshot that predates the outstanding turn.
    view.load_history().await.unwrap();
    let log = view.conversation().snapshot();
    assert_eq!(log.len(), 4);
    assert!(log[2].message_id.is_ephemeral());
    assert_eq!(log[2].role, Role::User);
    assert_eq!(log[3].role, Role::Loading);

    gate.notify_one();
    settle().await;
    let ids: Vec<String> = view
        .conversation()
        .snapshot()
        .iter()
        .map(|m| m.message_id.to_string())
        .collect();
    assert_eq!(ids, ["u0", "a0", "srv-u1", "srv-a1"]);
}

#[tokio::test(start_paused = true)]
async fn response_after_teardown_is_discarded() {
    let backend = FakeBackend::new();
    let gate = backend.hold_replies();
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;
    let conversation = view.conversation().clone();
    drop(view);

    gate.notify_one();
    settle().await;
    let state = conversation.lock();
    assert!(state.closed);
    assert_eq!(state.log.messages().iter().filter(|m| m.role == Role::Assistant).count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_submission_reverts_placeholder() {
    let backend = FakeBackend::new();
    let _gate = backend.hold_replies();
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;
    view.cancel_submission();

    assert!(!view.is_submitting());
    assert_eq!(count_roles(&view, Role::Loading), 0);
    assert_eq!(count_roles(&view, Role::User), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_reply_reveals_progressively_and_history_whole() {
    let backend = FakeBackend::with_history(vec![
        user_turn("u0", "what is it?"),
        assistant_reply("a0", "what is it?"),
    ]);
    let (mut view, _rx, _slot) = open(&backend);
    view.load_history().await.unwrap();

    let first = view.render();
    assert!(first.iter().all(|m| !m.just_arrived));
    assert_eq!(first[1].visible_count(), 3);

    view.edit("is it spicy?");
    view.submit().unwrap();
    let in_flight = view.render();
    assert!(matches!(in_flight.last().map(|m| &m.body), Some(Body::Loading)));
    settle().await;

    let reply = |view: &mut ChatView| view.render().pop().unwrap();
    let r = reply(&mut view);
    assert!(r.just_arrived);
    assert_eq!(r.visible_count(), 1);

    tokio::time::advance(Duration::from_millis(500)).await;
    settle().await;
    // The grace delay has cleared the pending id by now; the reveal carries on.
    assert_eq!(view.conversation().pending(), None);
    assert_eq!(reply(&mut view).visible_count(), 2);

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(reply(&mut view).visible_count(), 3);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(reply(&mut view).visible_count(), 3);

    // The earlier history reply stayed whole throughout.
    assert_eq!(view.render()[1].visible_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn draft_restores_on_mount_and_clears_on_submit() {
    let backend = FakeBackend::new();
    let slot = Arc::new(MemorySlot::new());
    {
        let (mut view, mut rx) = ChatView::open(backend.clone(), "chat-1", slot.clone(), &settings());
        view.edit("half-typed question");
        tokio::time::advance(Duration::from_millis(600)).await;
        while let Some(event) = rx.recv().await {
            if event == ChatEvent::DraftSaved {
                break;
            }
        }
    }
    assert_eq!(slot.load(DRAFT_KEY).unwrap().as_deref(), Some("half-typed question"));

    let (mut view, _rx) = ChatView::open(backend.clone(), "chat-1", slot.clone(), &settings());
    assert_eq!(view.input(), "half-typed question");
    view.submit().unwrap();
    assert_eq!(slot.load(DRAFT_KEY).unwrap(), None);
    assert_eq!(view.input(), "");
}

#[tokio::test(start_paused = true)]
async fn user_queries_follow_log_order() {
    let backend = FakeBackend::with_history(vec![
        user_turn("u0", "what is it?"),
        assistant_reply("a0", "what is it?"),
    ]);
    let (mut view, _rx, _slot) = open(&backend);
    view.load_history().await.unwrap();
    view.edit("is it spicy?");
    view.submit().unwrap();

    assert_eq!(view.user_queries(), ["what is it?", "is it spicy?"]);
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_merges_each_tick_and_stops_on_close() {
    let backend = FakeBackend::with_history(vec![user_turn("u0", "what is it?")]);
    let _gate = backend.hold_replies();
    let (mut view, _rx, _slot) = open(&backend);
    view.start_auto_refresh(Duration::from_secs(10));
    settle().await;
    assert_eq!(backend.history_calls.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(backend.history_calls.load(Ordering::SeqCst), 1);
    assert_eq!(view.conversation().snapshot().len(), 1);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;
    backend.history.lock().unwrap().push(assistant_reply("a0", "what is it?"));

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(backend.history_calls.load(Ordering::SeqCst), 2);
    let log = view.conversation().snapshot();
    assert_eq!(log.len(), 4);
    assert_eq!(log[1].message_id.as_str(), "a0");
    assert!(log[2].message_id.is_ephemeral());
    assert_eq!(log[3].role, Role::Loading);

    view.close();
    tokio::time::advance(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(backend.history_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn reply_merged_before_its_response_still_reveals() {
    let backend = FakeBackend::new();
    let gate = backend.hold_replies();
    backend.script(Reply::Committed);
    let (mut view, _rx, _slot) = open(&backend);

    view.edit("is it spicy?");
    view.submit().unwrap();
    settle().await;

    // A refresh sees the committed turn while the follow-up is still out.
    backend
        .history
        .lock()
        .unwrap()
        .extend([user_turn("srv-u9", "is it spicy?"), assistant_reply("srv-a9", "is it spicy?")]);
    view.load_history().await.unwrap();
    let early = view.render();
    let reply = early.iter().find(|m| m.message_id.as_str() == "srv-a9").unwrap();
    assert!(!reply.just_arrived);
    assert_eq!(reply.visible_count(), 3);

    gate.notify_one();
    settle().await;
    let ids: Vec<String> = view
        .conversation()
        .snapshot()
        .iter()
        .map(|m| m.message_id.to_string())
        .collect();
    assert_eq!(ids, ["srv-u9", "srv-a9"]);

    let reply = view.render().pop().unwrap();
    assert!(reply.just_arrived);
    assert_eq!(reply.visible_count(), 1);
    tokio::time::advance(Duration::from_millis(500)).await;
    settle().await;
    let reply = view.render().pop().unwrap();
    assert!(reply.just_arrived);
    assert_eq!(reply.visible_count(), 2);
}
