#[macro_use]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::*;
use tokio::sync::Notify;
use wayfarer::client::models::chat::Alignment;
use wayfarer::client::models::group_view::{GroupView, ViewPhase, ViewSettings};
use wayfarer::client::services::groups_service::GroupBackend;
use wayfarer::client::services::websocket_client::{ChannelStatus, RealtimeChannel};
use wayfarer::common::protocol::{chat_topic, poll_topic, SEND_MESSAGE_DESTINATION};
use wayfarer::common::{ClientError, UserVote};

async fn mount_with(backend: Arc<FakeBackend>, channel: Arc<FakeChannel>) -> GroupView {
    let dyn_backend: Arc<dyn GroupBackend> = backend;
    GroupView::mount(GROUP, alice(), dyn_backend, ViewSettings::default(), move || channel as Arc<dyn RealtimeChannel>)
        .await
        .expect("mount")
}

fn update_json(poll_id: &str, version: Option<u64>, a: u64, b: u64) -> String {
    serde_json::json!({
        "pollId": poll_id,
        "version": version,
        "options": [{"optionId": "a", "voteCount": a}, {"optionId": "b", "voteCount": b}],
    })
    .to_string()
}

#[tokio::test]
async fn mount_loads_group_and_subscribes_to_both_topics() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 1), ("b", 0)]));
    backend.votes.lock().unwrap().push(UserVote { poll_id: "p1".into(), option_id: "a".into() });
    backend.checklist.lock().unwrap().push(item(1, "Book flights", false));
    backend.history.lock().unwrap().extend([chat(1, "u2", "hey"), chat(2, "u1", "hi")]);
    let channel = FakeChannel::new(ChannelStatus::Open);

    let view = mount_with(backend.clone(), channel.clone()).await;

    let state = view.snapshot().await;
    assert_eq!(state.group.trip_name, "Lisbon");
    assert_eq!(state.polls.polls().len(), 1);
    assert_eq!(state.polls.selection("p1"), Some("a"));
    assert_eq!(state.checklist.items().len(), 1);
    assert_eq!(state.chat.len(), 2);
    assert!(state.last_error.is_none());

    let mut expected = vec![chat_topic(GROUP), poll_topic(GROUP)];
    expected.sort();
    assert_eq!(channel.destinations(), expected);
    assert!(eventually!(view.phase().await == ViewPhase::Connected));
}

#[tokio::test]
async fn unknown_group_fails_before_connecting() {
    let backend = FakeBackend::new();
    let connected = Arc::new(AtomicBool::new(false));
    let flag = connected.clone();
    let dyn_backend: Arc<dyn GroupBackend> = backend;
    let result = GroupView::mount("nope", alice(), dyn_backend, ViewSettings::default(), move || {
        flag.store(true, Ordering::SeqCst);
        FakeChannel::new(ChannelStatus::Open) as Arc<dyn RealtimeChannel>
    })
    .await;

    assert!(matches!(result, Err(ClientError::Http { status: 404, .. })));
    assert!(!connected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_poll_fetch_still_mounts_with_an_error() {
    let backend = FakeBackend::new();
    backend.fail_polls.store(true, Ordering::SeqCst);
    let view = mount_with(backend, FakeChannel::new(ChannelStatus::Open)).await;
    let state = view.snapshot().await;
    assert!(state.polls.polls().is_empty());
    assert!(state.last_error.is_some());
}

#[tokio::test]
async fn pushed_chat_is_aligned_by_sender() {
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = mount_with(FakeBackend::new(), channel.clone()).await;

    assert!(channel.push(&chat_topic(GROUP), &serde_json::to_string(&chat(10, "u1", "mine")).unwrap()));
    assert!(channel.push(&chat_topic(GROUP), &serde_json::to_string(&chat(11, "u2", "theirs")).unwrap()));
    assert!(eventually!(view.chat_lines().await.len() == 2));

    let lines = view.chat_lines().await;
    assert_eq!(lines[0].content, "mine");
    assert_eq!(lines[0].alignment, Alignment::Right);
    assert!(lines[0].highlighted);
    assert_eq!(lines[1].sender, "U2");
    assert_eq!(lines[1].alignment, Alignment::Left);
}

#[tokio::test]
async fn malformed_push_is_dropped() {
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = mount_with(FakeBackend::new(), channel.clone()).await;
    channel.push(&chat_topic(GROUP), "not json");
    channel.push(&chat_topic(GROUP), &serde_json::to_string(&chat(12, "u2", "ok")).unwrap());
    assert!(eventually!(view.chat_lines().await.len() == 1));
}

#[tokio::test]
async fn poll_push_updates_counts_and_ignores_stale_versions() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 0), ("b", 0)]));
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = mount_with(backend, channel.clone()).await;

    channel.push(&poll_topic(GROUP), &update_json("p1", Some(2), 3, 5));
    assert!(eventually!(view.poll_lines("p1").await[0].votes == 3));
    let lines = view.poll_lines("p1").await;
    assert_eq!(lines[0].percent, 37.5);
    assert_eq!(lines[1].percent, 62.5);

    channel.push(&poll_topic(GROUP), &update_json("p1", Some(1), 9, 9));
    channel.push(&poll_topic(GROUP), &update_json("zzz", None, 9, 9));
    channel.push(&poll_topic(GROUP), &update_json("p1", Some(3), 4, 5));
    assert!(eventually!(view.poll_lines("p1").await[0].votes == 4));
    assert_eq!(view.poll_lines("p1").await[1].votes, 5);
    assert_eq!(view.read(|s| s.polls.polls().len()).await, 1);
}

#[tokio::test]
async fn zero_votes_show_zero_percent() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 0), ("b", 0)]));
    let view = mount_with(backend, FakeChannel::new(ChannelStatus::Open)).await;
    assert!(view.poll_lines("p1").await.iter().all(|l| l.percent == 0.0));
}

#[tokio::test]
async fn failed_vote_reverts_selection() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 1), ("b", 0)]));
    backend.fail_votes.store(true, Ordering::SeqCst);
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    let result = view.vote("p1", "b").await;
    assert!(matches!(result, Err(ClientError::Http { status: 500, .. })));
    assert_eq!(view.read(|s| s.polls.selection("p1").map(str::to_string)).await, None);
    assert!(view.read(|s| s.last_error.clone()).await.is_some());
    assert_eq!(backend.count("vote 42 p1 b u1"), 1);
}

#[tokio::test]
async fn accepted_vote_keeps_selection_and_repeat_is_ignored() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 1), ("b", 0)]));
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    assert!(view.vote("p1", "b").await.unwrap());
    assert!(!view.vote("p1", "b").await.unwrap());
    assert_eq!(view.read(|s| s.polls.selection("p1").map(str::to_string)).await.as_deref(), Some("b"));
    assert_eq!(backend.count("vote "), 1);
    // counts only move when the broker pushes them
    assert_eq!(view.poll_lines("p1").await[1].votes, 0);
}

#[tokio::test]
async fn blank_or_offline_chat_is_not_published() {
    let channel = FakeChannel::new(ChannelStatus::Connecting);
    let view = mount_with(FakeBackend::new(), channel.clone()).await;

    assert!(!view.send_chat("   ").await.unwrap());
    assert!(!view.send_chat("hello").await.unwrap());
    assert!(channel.published().is_empty());

    channel.set_status(ChannelStatus::Open);
    assert!(!view.send_chat("\t\n").await.unwrap());
    assert!(view.send_chat("  hello  ").await.unwrap());

    let published = channel.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, SEND_MESSAGE_DESTINATION);
    let body: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(body["content"], "hello");
    assert_eq!(body["senderId"], "u1");
    assert_eq!(body["groupId"], GROUP);
}

#[tokio::test]
async fn channel_status_drives_phase() {
    let channel = FakeChannel::new(ChannelStatus::Connecting);
    let view = mount_with(FakeBackend::new(), channel.clone()).await;
    assert!(eventually!(view.phase().await == ViewPhase::Connecting));

    channel.set_status(ChannelStatus::Open);
    assert!(eventually!(view.phase().await == ViewPhase::Connected));
    channel.set_status(ChannelStatus::Error);
    assert!(eventually!(view.phase().await == ViewPhase::Disconnected));
    channel.set_status(ChannelStatus::Open);
    assert!(eventually!(view.phase().await == ViewPhase::Connected));
}

#[tokio::test]
async fn unmount_freezes_state_and_closes_channel() {
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = mount_with(FakeBackend::new(), channel.clone()).await;
    let mut events = view.events();

    view.unmount().await;
    view.unmount().await;

    assert!(channel.is_closed());
    assert!(!view.is_mounted());
    assert_eq!(view.phase().await, ViewPhase::Unmounted);
    assert!(!channel.push(&chat_topic(GROUP), &serde_json::to_string(&chat(1, "u2", "late")).unwrap()));
    assert!(view.chat_lines().await.is_empty());
    assert!(matches!(view.send_chat("hi").await, Err(ClientError::Cancelled)));
    assert!(matches!(view.vote("p1", "a").await, Err(ClientError::Cancelled)));

    let mut saw_unmounted = false;
    while let Ok(event) = events.try_recv() {
        saw_unmounted |= event == wayfarer::client::models::messages::GroupEvent::Unmounted;
    }
    assert!(saw_unmounted);
}

#[tokio::test]
async fn vote_finishing_after_unmount_changes_nothing() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 0), ("b", 0)]));
    backend.fail_votes.store(true, Ordering::SeqCst);
    let gate = Arc::new(Notify::new());
    *backend.vote_gate.lock().unwrap() = Some(gate.clone());
    let view = Arc::new(mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await);

    let voting = {
        let view = view.clone();
        tokio::spawn(async move { view.vote("p1", "a").await })
    };
    assert!(eventually!(backend.count("vote ") == 1));
    assert_eq!(view.read(|s| s.polls.selection("p1").map(str::to_string)).await.as_deref(), Some("a"));

    view.unmount().await;
    gate.notify_one();
    assert!(voting.await.unwrap().is_err());

    let state = view.snapshot().await;
    assert_eq!(state.polls.selection("p1"), Some("a"));
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn dropping_the_view_stops_the_pump() {
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = mount_with(FakeBackend::new(), channel.clone()).await;
    drop(view);
    assert!(eventually!(!channel.push(&chat_topic(GROUP), "{}")));
}

#[tokio::test]
async fn cancelled_delete_sends_nothing() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 0), ("b", 0)]));
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    let deleted = view
        .delete_poll("p1", &|prompt: &str| {
            assert!(prompt.contains("question p1"));
            false
        })
        .await
        .unwrap();
    assert!(!deleted);
    assert_eq!(backend.count("delete_poll"), 0);
    assert_eq!(view.read(|s| s.polls.polls().len()).await, 1);

    assert!(view.delete_poll("p1", &|p: &str| !p.is_empty()).await.unwrap());
    assert_eq!(backend.count("delete_poll 42 p1"), 1);
    assert!(view.read(|s| s.polls.polls().is_empty()).await);
}

#[tokio::test]
async fn invalid_poll_is_rejected_locally() {
    let backend = FakeBackend::new();
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    let one_option = vec!["Rome".to_string(), "   ".to_string()];
    assert!(matches!(view.create_poll("Where?", &one_option, false).await, Err(ClientError::Validation(_))));
    let options = vec!["Rome".to_string(), "Oslo".to_string()];
    assert!(matches!(view.create_poll("  ", &options, false).await, Err(ClientError::Validation(_))));
    assert_eq!(backend.count("create_poll"), 0);

    view.create_poll("Where?", &options, true).await.unwrap();
    assert_eq!(backend.count("create_poll 42 Where?"), 1);
    let polls = view.read(|s| s.polls.polls().to_vec()).await;
    assert_eq!(polls.len(), 1);
    assert_eq!(polls[0].options.len(), 2);
    assert!(polls[0].anonymous);
}

#[tokio::test]
async fn checklist_toggle_reverts_on_failure() {
    let backend = FakeBackend::new();
    backend.checklist.lock().unwrap().push(item(1, "Pack", false));
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    assert!(view.toggle_checklist_item(1).await.unwrap());
    assert!(view.read(|s| s.checklist.item(1).map(|i| i.done)).await.unwrap());

    backend.fail_toggles.store(true, Ordering::SeqCst);
    assert!(view.toggle_checklist_item(1).await.is_err());
    assert!(view.read(|s| s.checklist.item(1).map(|i| i.done)).await.unwrap());
    assert!(matches!(view.toggle_checklist_item(99).await, Err(ClientError::Validation(_))));
}

#[tokio::test]
async fn checklist_add_edit_delete() {
    let backend = FakeBackend::new();
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    assert!(view.add_checklist_item("  ", "", None).await.is_err());
    let created = view.add_checklist_item("Buy tickets", "", Some("2024-06-01".into())).await.unwrap();
    let id = created.item_id.unwrap();
    assert_eq!(created.assigned_to, "u1");

    let edited = view.edit_checklist_item(id, "Buy train tickets", Some("u2")).await.unwrap();
    assert_eq!(edited.assigned_to, "u2");
    assert_eq!(view.read(|s| s.checklist.item(id).map(|i| i.task.clone())).await.as_deref(), Some("Buy train tickets"));

    view.delete_checklist_item(id).await.unwrap();
    assert!(view.read(|s| s.checklist.items().is_empty()).await);
}

#[tokio::test]
async fn older_history_is_prepended_page_by_page() {
    let backend = FakeBackend::new();
    backend.history.lock().unwrap().extend((1..=5).map(|i| chat(i, "u2", &format!("m{}", i))));
    let settings = ViewSettings { history_limit: 200, page_size: 2 };
    let dyn_backend: Arc<dyn GroupBackend> = backend.clone();
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = GroupView::mount(GROUP, alice(), dyn_backend, settings, move || channel as Arc<dyn RealtimeChannel>)
        .await
        .unwrap();

    let contents = |lines: Vec<wayfarer::client::models::chat::ChatLine>| lines.into_iter().map(|l| l.content).collect::<Vec<_>>();
    assert_eq!(contents(view.chat_lines().await), ["m4", "m5"]);
    assert_eq!(view.load_older_messages().await.unwrap(), 2);
    assert_eq!(contents(view.chat_lines().await), ["m2", "m3", "m4", "m5"]);
    assert_eq!(view.load_older_messages().await.unwrap(), 1);
    assert_eq!(view.load_older_messages().await.unwrap(), 0);
    assert_eq!(contents(view.chat_lines().await), ["m1", "m2", "m3", "m4", "m5"]);
    assert_eq!(backend.count("chat_history"), 3);
}

#[tokio::test]
async fn changing_a_vote_moves_selection_and_follows_pushed_tallies() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 3), ("b", 5)]));
    let channel = FakeChannel::new(ChannelStatus::Open);
    let view = mount_with(backend.clone(), channel.clone()).await;

    assert!(view.vote("p1", "a").await.unwrap());
    channel.push(&poll_topic(GROUP), &update_json("p1", Some(1), 4, 5));
    assert!(eventually!(view.poll_lines("p1").await[0].votes == 4));

    assert!(view.vote("p1", "b").await.unwrap());
    channel.push(&poll_topic(GROUP), &update_json("p1", Some(2), 3, 6));
    assert!(eventually!(view.poll_lines("p1").await[1].votes == 6));

    let lines = view.poll_lines("p1").await;
    assert_eq!((lines[0].votes, lines[1].votes), (3, 6));
    assert!(!lines[0].selected);
    assert!(lines[1].selected);
    assert_eq!(backend.count("vote 42 p1"), 2);
}

#[tokio::test]
async fn live_chat_after_loading_history_leaves_no_gap() {
    let backend = FakeBackend::new();
    backend.history.lock().unwrap().extend((1..=6).map(|i| chat(i, "u2", &format!("m{}", i))));
    let settings = ViewSettings { history_limit: 3, page_size: 2 };
    let dyn_backend: Arc<dyn GroupBackend> = backend.clone();
    let channel = FakeChannel::new(ChannelStatus::Open);
    let pushes = channel.clone();
    let view = GroupView::mount(GROUP, alice(), dyn_backend, settings, move || channel as Arc<dyn RealtimeChannel>)
        .await
        .unwrap();
    assert_eq!(view.load_older_messages().await.unwrap(), 2);

    for i in 7..=10 {
        let message = chat(i, "u2", &format!("m{}", i));
        backend.history.lock().unwrap().push(message.clone());
        assert!(pushes.push(&chat_topic(GROUP), &serde_json::to_string(&message).unwrap()));
    }
    assert!(eventually!(view.chat_lines().await.last().map(|l| l.content.clone()).as_deref() == Some("m10")));

    for _ in 0..10 {
        if view.read(|s| s.chat.history_exhausted()).await {
            break;
        }
        view.load_older_messages().await.unwrap();
    }
    assert_eq!(backend.count("chat_history"), 5);

    let ids: Vec<i64> = view.read(|s| s.chat.messages().filter_map(|m| m.id).collect()).await;
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn editing_a_poll_renames_it_and_reloads() {
    let backend = FakeBackend::new();
    backend.polls.lock().unwrap().push(poll("p1", &[("a", 2), ("b", 1)]));
    let view = mount_with(backend.clone(), FakeChannel::new(ChannelStatus::Open)).await;

    let texts = vec!["Lisbon".to_string(), "Porto".to_string()];
    view.edit_poll("p1", "Which city first?", &texts).await.unwrap();
    assert_eq!(backend.count("update_poll 42 p1"), 1);

    let state = view.snapshot().await;
    let edited = state.polls.poll("p1").unwrap();
    assert_eq!(edited.question, "Which city first?");
    assert_eq!(edited.options[1].option_text, "Porto");
    assert_eq!(edited.options[0].vote_count, 2);

    assert!(matches!(view.edit_poll("p1", "Too few", &texts[..1]).await, Err(ClientError::Validation(_))));
    assert!(matches!(view.edit_poll("p9", "Unknown", &texts).await, Err(ClientError::Validation(_))));
    assert_eq!(backend.count("update_poll"), 1);
}
