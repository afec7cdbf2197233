#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};

use wayfarer::client::services::groups_service::GroupBackend;
use wayfarer::client::services::websocket_client::{ChannelStatus, RealtimeChannel, Subscription};
use wayfarer::client::utils::session_store::Session;
use wayfarer::common::{
    ChatMessage, ChecklistItem, ClientError, ClientResult, CreatePollRequest, Poll, PollOption, Role, TripGroup,
    UpdatePollRequest, User, UserVote,
};

pub const GROUP: &str = "42";

pub fn alice() -> Session {
    Session { token: "token-alice".into(), user_id: "u1".into(), username: "alice".into(), role: Role::User }
}

pub fn user(id: &str, name: &str) -> User {
    User { user_id: id.into(), username: name.into(), email: format!("{}@example.com", name), role: Role::User }
}

pub fn group() -> TripGroup {
    TripGroup {
        trip_group_id: GROUP.into(),
        trip_name: "Lisbon".into(),
        trip_description: Some("long weekend".into()),
        status: None,
        trip_avatar_url: None,
        dates: None,
        created_by: Some(user("u1", "alice")),
        members: vec![user("u1", "alice"), user("u2", "bob")],
        polls: Vec::new(),
        checklist_items: Vec::new(),
    }
}

pub fn poll(id: &str, counts: &[(&str, u64)]) -> Poll {
    Poll {
        poll_id: id.into(),
        question: format!("question {}", id),
        anonymous: false,
        options: counts
            .iter()
            .map(|(option_id, votes)| PollOption {
                option_id: option_id.to_string(),
                option_text: format!("option {}", option_id),
                vote_count: *votes,
            })
            .collect(),
    }
}

pub fn chat(id: i64, sender: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: Some(id),
        group_id: GROUP.into(),
        sender_id: sender.into(),
        sender_username: sender.to_uppercase(),
        content: content.into(),
        timestamp: Some("2024-05-01T10:00:00Z".into()),
    }
}

pub fn item(id: i64, task: &str, done: bool) -> ChecklistItem {
    ChecklistItem { item_id: Some(id), task: task.into(), assigned_to: "u1".into(), done, due_date: None }
}

/// In-memory stand in for the REST backend.
#[derive(Default)]
pub struct FakeBackend {
    pub group: Mutex<Option<TripGroup>>,
    pub polls: Mutex<Vec<Poll>>,
    pub votes: Mutex<Vec<UserVote>>,
    pub checklist: Mutex<Vec<ChecklistItem>>,
    /// Oldest first.
    pub history: Mutex<Vec<ChatMessage>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_votes: AtomicBool,
    pub fail_toggles: AtomicBool,
    pub fail_polls: AtomicBool,
    /// When set, `vote` waits for a notification before answering.
    pub vote_gate: Mutex<Option<Arc<Notify>>>,
    next_id: AtomicU64,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        *backend.group.lock().unwrap() = Some(group());
        backend.next_id.store(100, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn refuse() -> ClientError {
        ClientError::Http { status: 500, message: "boom".into() }
    }
}

#[async_trait]
impl GroupBackend for FakeBackend {
    async fn fetch_group(&self, group_id: &str) -> ClientResult<TripGroup> {
        self.record(format!("fetch_group {}", group_id));
        self.group
            .lock()
            .unwrap()
            .clone()
            .filter(|g| g.trip_group_id == group_id)
            .ok_or(ClientError::Http { status: 404, message: "Trip group not found".into() })
    }

    async fn fetch_polls(&self, group_id: &str) -> ClientResult<Vec<Poll>> {
        self.record(format!("fetch_polls {}", group_id));
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(Self::refuse());
        }
        Ok(self.polls.lock().unwrap().clone())
    }

    async fn create_poll(&self, group_id: &str, request: &CreatePollRequest) -> ClientResult<()> {
        self.record(format!("create_poll {} {}", group_id, request.question));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let options: Vec<(String, u64)> = request.options.iter().enumerate().map(|(i, _)| (format!("{}-{}", id, i), 0)).collect();
        let refs: Vec<(&str, u64)> = options.iter().map(|(o, c)| (o.as_str(), *c)).collect();
        let mut created = poll(&id, &refs);
        created.question = request.question.clone();
        created.anonymous = request.anonymous;
        self.polls.lock().unwrap().push(created);
        Ok(())
    }

    async fn update_poll(&self, group_id: &str, poll_id: &str, request: &UpdatePollRequest) -> ClientResult<()> {
        self.record(format!("update_poll {} {}", group_id, poll_id));
        let mut polls = self.polls.lock().unwrap();
        let Some(poll) = polls.iter_mut().find(|p| p.poll_id == poll_id) else {
            return Err(ClientError::Http { status: 404, message: "Poll not found".into() });
        };
        poll.question = request.question.clone();
        for edit in &request.options {
            if let Some(option) = poll.options.iter_mut().find(|o| o.option_id == edit.option_id) {
                option.option_text = edit.option_text.clone();
            }
        }
        Ok(())
    }

    async fn delete_poll(&self, group_id: &str, poll_id: &str) -> ClientResult<()> {
        self.record(format!("delete_poll {} {}", group_id, poll_id));
        self.polls.lock().unwrap().retain(|p| p.poll_id != poll_id);
        Ok(())
    }

    async fn vote(&self, group_id: &str, poll_id: &str, option_id: &str, user_id: &str) -> ClientResult<()> {
        self.record(format!("vote {} {} {} {}", group_id, poll_id, option_id, user_id));
        let gate = self.vote_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_votes.load(Ordering::SeqCst) {
            return Err(Self::refuse());
        }
        Ok(())
    }

    async fn user_votes(&self, user_id: &str) -> ClientResult<Vec<UserVote>> {
        self.record(format!("user_votes {}", user_id));
        Ok(self.votes.lock().unwrap().clone())
    }

    async fn fetch_checklist(&self, group_id: &str) -> ClientResult<Vec<ChecklistItem>> {
        self.record(format!("fetch_checklist {}", group_id));
        Ok(self.checklist.lock().unwrap().clone())
    }

    async fn add_checklist_item(&self, group_id: &str, item: &ChecklistItem) -> ClientResult<ChecklistItem> {
        self.record(format!("add_checklist_item {} {}", group_id, item.task));
        let mut created = item.clone();
        created.item_id = Some(self.next_id.fetch_add(1, Ordering::SeqCst) as i64);
        self.checklist.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_checklist_item(&self, group_id: &str, item_id: i64, item: &ChecklistItem) -> ClientResult<ChecklistItem> {
        self.record(format!("update_checklist_item {} {}", group_id, item_id));
        Ok(item.clone())
    }

    async fn toggle_checklist_item(&self, group_id: &str, item_id: i64) -> ClientResult<()> {
        self.record(format!("toggle_checklist_item {} {}", group_id, item_id));
        if self.fail_toggles.load(Ordering::SeqCst) {
            return Err(Self::refuse());
        }
        Ok(())
    }

    async fn delete_checklist_item(&self, group_id: &str, item_id: i64) -> ClientResult<()> {
        self.record(format!("delete_checklist_item {} {}", group_id, item_id));
        self.checklist.lock().unwrap().retain(|i| i.item_id != Some(item_id));
        Ok(())
    }

    async fn chat_history(&self, group_id: &str, page: u32, size: usize) -> ClientResult<Vec<ChatMessage>> {
        self.record(format!("chat_history {} {} {}", group_id, page, size));
        let history = self.history.lock().unwrap();
        let end = history.len().saturating_sub(page as usize * size);
        let start = end.saturating_sub(size);
        Ok(history[start..end].to_vec())
    }
}

/// Push channel driven by the test.
pub struct FakeChannel {
    status: watch::Sender<ChannelStatus>,
    sinks: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    published: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl FakeChannel {
    pub fn new(initial: ChannelStatus) -> Arc<Self> {
        Arc::new(Self {
            status: watch::Sender::new(initial),
            sinks: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.status.send_replace(status);
    }

    /// Delivers a body to the subscriber of `destination`. False if nobody listens.
    pub fn push(&self, destination: &str, body: &str) -> bool {
        match self.sinks.lock().unwrap().get(destination) {
            Some(tx) => tx.send(body.to_string()).is_ok(),
            None => false,
        }
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut d: Vec<String> = self.sinks.lock().unwrap().keys().cloned().collect();
        d.sort();
        d
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeChannel for FakeChannel {
    async fn subscribe(&self, destination: &str) -> ClientResult<Subscription> {
        if self.is_closed() {
            return Err(ClientError::Channel("closed".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().unwrap().insert(destination.to_string(), tx);
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(Subscription::new(id, destination, rx))
    }

    async fn publish(&self, destination: &str, body: String) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        self.published.lock().unwrap().push((destination.to_string(), body));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sinks.lock().unwrap().clear();
        self.status.send_replace(ChannelStatus::Closed);
    }

    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }
}

/// Re-evaluates an async condition until it holds or a second passes.
macro_rules! eventually {
    ($cond:expr) => {{
        let mut ok = false;
        for _ in 0..100 {
            if $cond {
                ok = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        ok
    }};
}
