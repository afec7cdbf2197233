//! The group screen: trip details, realtime chat, live polls and the shared
//! checklist of one trip group, kept in sync over REST and the push channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use log::{debug, info, warn};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::client::config::ClientConfig;
use crate::client::models::chat::{ChatLine, ChatLog};
use crate::client::models::checklist::{self, Checklist};
use crate::client::models::messages::GroupEvent;
use crate::client::models::polls::{self, OptionLine, PollBoard};
use crate::client::services::groups_service::GroupBackend;
use crate::client::services::message_parser::{parse_chat_message, parse_poll_update};
use crate::client::services::websocket_client::{ChannelStatus, RealtimeChannel, Subscription};
use crate::client::utils::session_store::Session;
use crate::common::protocol::{chat_topic, poll_topic, SEND_MESSAGE_DESTINATION};
use crate::common::{ChecklistItem, ClientError, ClientResult, TripGroup};

const EVENT_CAPACITY: usize = 256;

/// Asks the user to confirm a destructive action.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Idle,
    Connecting,
    Connected,
    /// The channel dropped; it keeps retrying until it gives up or we unmount.
    Disconnected,
    Unmounted,
}

impl From<ChannelStatus> for ViewPhase {
    fn from(status: ChannelStatus) -> Self {
        match status {
            ChannelStatus::Connecting => ViewPhase::Connecting,
            ChannelStatus::Open => ViewPhase::Connected,
            ChannelStatus::Closed | ChannelStatus::Error => ViewPhase::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSettings {
    pub history_limit: usize,
    pub page_size: usize,
}

impl ViewSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self { history_limit: config.chat_history_limit, page_size: config.chat_page_size }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self { history_limit: 200, page_size: 50 }
    }
}

#[derive(Debug, Clone)]
pub struct GroupState {
    pub group: TripGroup,
    pub chat: ChatLog,
    pub polls: PollBoard,
    pub checklist: Checklist,
    pub phase: ViewPhase,
    pub last_error: Option<String>,
}

impl GroupState {
    fn new(group: TripGroup, settings: ViewSettings) -> Self {
        let chat = ChatLog::new(group.trip_group_id.clone(), settings.history_limit);
        Self {
            group,
            chat,
            polls: PollBoard::new(),
            checklist: Checklist::new(),
            phase: ViewPhase::Idle,
            last_error: None,
        }
    }
}

/// State shared between the view and its push pump. Every mutation goes
/// through `update`, which checks the mounted flag while holding the lock.
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<GroupState>>,
    mounted: Arc<AtomicBool>,
    events: broadcast::Sender<GroupEvent>,
}

impl Shared {
    async fn update<R>(&self, f: impl FnOnce(&mut GroupState) -> R) -> Option<R> {
        let mut state = self.state.lock().await;
        if !self.mounted.load(Ordering::SeqCst) {
            return None;
        }
        Some(f(&mut *state))
    }

    fn emit(&self, event: GroupEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn on_chat(&self, body: &str) {
        let message = match parse_chat_message(body) {
            Ok(m) => m,
            Err(e) => {
                warn!("[GROUP_VIEW] Dropping unreadable chat push: {}", e);
                return;
            }
        };
        if let Some(true) = self.update(|s| s.chat.push(message.clone())).await {
            self.emit(GroupEvent::ChatReceived(message));
        }
    }

    async fn on_poll(&self, body: &str) {
        let update = match parse_poll_update(body) {
            Ok(u) => u,
            Err(e) => {
                warn!("[GROUP_VIEW] Dropping unreadable poll push: {}", e);
                return;
            }
        };
        match self.update(|s| s.polls.apply_update(&update)).await {
            Some(true) => self.emit(GroupEvent::PollUpdated(update)),
            Some(false) => {
                debug!("[GROUP_VIEW] Ignored poll push for {}", update.poll_id);
                self.emit(GroupEvent::PollUpdateIgnored { poll_id: update.poll_id });
            }
            None => {}
        }
    }

    async fn on_status(&self, status: ChannelStatus) {
        let phase = ViewPhase::from(status);
        let changed = self
            .update(|s| {
                let changed = s.phase != phase;
                s.phase = phase;
                changed
            })
            .await;
        if changed == Some(true) {
            info!("[GROUP_VIEW] Channel {}", status);
            self.emit(GroupEvent::StatusChanged(status));
        }
    }

    async fn record_error(&self, error: &ClientError) {
        let text = error.to_string();
        if self.update(|s| s.last_error = Some(text.clone())).await.is_some() {
            self.emit(GroupEvent::Error(text));
        }
    }
}

async fn pump(shared: Shared, mut chat: Subscription, mut polls: Subscription, mut status: watch::Receiver<ChannelStatus>) {
    let initial = *status.borrow_and_update();
    shared.on_status(initial).await;
    let mut status_alive = true;
    loop {
        tokio::select! {
            body = chat.recv() => match body {
                Some(body) => shared.on_chat(&body).await,
                None => break,
            },
            body = polls.recv() => match body {
                Some(body) => shared.on_poll(&body).await,
                None => break,
            },
            changed = status.changed(), if status_alive => match changed {
                Ok(()) => {
                    let current = *status.borrow_and_update();
                    shared.on_status(current).await;
                }
                Err(_) => status_alive = false,
            },
        }
    }
    let last = *status.borrow();
    shared.on_status(last).await;
    debug!("[GROUP_VIEW] Push pump finished");
}

/// A mounted group screen. Dropping it or calling `unmount` stops every
/// further state change, including REST calls still in flight.
pub struct GroupView {
    group_id: String,
    session: Session,
    settings: ViewSettings,
    backend: Arc<dyn GroupBackend>,
    channel: Arc<dyn RealtimeChannel>,
    shared: Shared,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl GroupView {
    /// Loads the group and opens the push channel. Only a failure to load the
    /// group itself or to subscribe aborts the mount; the other fetches report
    /// through `last_error`.
    pub async fn mount<F>(
        group_id: &str,
        session: Session,
        backend: Arc<dyn GroupBackend>,
        settings: ViewSettings,
        connect: F,
    ) -> ClientResult<Self>
    where
        F: FnOnce() -> Arc<dyn RealtimeChannel>,
    {
        info!("[GROUP_VIEW] Mounting group {} for {}", group_id, session.username);
        let group = backend.fetch_group(group_id).await?;
        let mut state = GroupState::new(group, settings);

        match backend.fetch_polls(group_id).await {
            Ok(list) => state.polls.replace_all(list),
            Err(e) => {
                warn!("[GROUP_VIEW] Could not load polls: {}", e);
                state.polls.replace_all(state.group.polls.clone());
                state.last_error = Some(e.to_string());
            }
        }
        match backend.user_votes(&session.user_id).await {
            Ok(votes) => state.polls.preselect(&votes),
            Err(e) => warn!("[GROUP_VIEW] Could not load previous votes: {}", e),
        }
        match backend.fetch_checklist(group_id).await {
            Ok(items) => state.checklist.replace_all(items),
            Err(e) => {
                warn!("[GROUP_VIEW] Could not load checklist: {}", e);
                state.checklist.replace_all(state.group.checklist_items.clone());
                state.last_error = Some(e.to_string());
            }
        }
        match backend.chat_history(group_id, 0, settings.page_size).await {
            Ok(page) => {
                state.chat.prepend_page(page, settings.page_size);
            }
            Err(e) => {
                warn!("[GROUP_VIEW] Could not load chat history: {}", e);
                state.last_error = Some(e.to_string());
            }
        }
        state.phase = ViewPhase::Connecting;

        let channel = connect();
        let subscriptions = async {
            let chat = channel.subscribe(&chat_topic(group_id)).await?;
            let polls = channel.subscribe(&poll_topic(group_id)).await?;
            Ok::<_, ClientError>((chat, polls))
        }
        .await;
        let (chat, polls) = match subscriptions {
            Ok(subs) => subs,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared { state: Arc::new(Mutex::new(state)), mounted: Arc::new(AtomicBool::new(true)), events };
        let handle = tokio::spawn(pump(shared.clone(), chat, polls, channel.status()));

        Ok(Self {
            group_id: group_id.to_string(),
            session,
            settings,
            backend,
            channel,
            shared,
            pump: StdMutex::new(Some(handle)),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.mounted.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<GroupEvent> {
        self.shared.events.subscribe()
    }

    pub fn channel_status(&self) -> watch::Receiver<ChannelStatus> {
        self.channel.status()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&GroupState) -> R) -> R {
        let state = self.shared.state.lock().await;
        f(&*state)
    }

    pub async fn snapshot(&self) -> GroupState {
        self.read(GroupState::clone).await
    }

    pub async fn phase(&self) -> ViewPhase {
        self.read(|s| s.phase).await
    }

    pub async fn chat_lines(&self) -> Vec<ChatLine> {
        let user_id = self.session.user_id.clone();
        self.read(move |s| s.chat.render(&user_id)).await
    }

    pub async fn poll_lines(&self, poll_id: &str) -> Vec<OptionLine> {
        self.read(|s| s.polls.render(poll_id)).await
    }

    fn ensure_mounted(&self) -> ClientResult<()> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(ClientError::Cancelled)
        }
    }

    /// Publishes a chat message. Returns false without sending when the text
    /// is blank or the channel is not open.
    pub async fn send_chat(&self, text: &str) -> ClientResult<bool> {
        self.ensure_mounted()?;
        let composed = self.read(|s| s.chat.compose(text, &self.session)).await?;
        let Some(message) = composed else {
            return Ok(false);
        };
        if !self.channel.is_open() {
            debug!("[GROUP_VIEW] Channel not open, message not sent");
            return Ok(false);
        }
        let body = serde_json::to_string(&message)?;
        match self.channel.publish(SEND_MESSAGE_DESTINATION, body).await {
            Ok(()) => Ok(true),
            Err(ClientError::NotConnected) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetches the next older page of chat history. Returns how many messages were added.
    pub async fn load_older_messages(&self) -> ClientResult<usize> {
        self.ensure_mounted()?;
        let (page, exhausted) = self.read(|s| (s.chat.next_page(), s.chat.history_exhausted())).await;
        if exhausted {
            return Ok(0);
        }
        let size = self.settings.page_size;
        let messages = self.backend.chat_history(&self.group_id, page, size).await?;
        self.shared
            .update(|s| s.chat.prepend_page(messages, size))
            .await
            .ok_or(ClientError::Cancelled)
    }

    /// Optimistic vote. The selection shows immediately and is rolled back if
    /// the backend refuses. Returns false if there was nothing to submit.
    pub async fn vote(&self, poll_id: &str, option_id: &str) -> ClientResult<bool> {
        self.ensure_mounted()?;
        let pending = self
            .shared
            .update(|s| s.polls.begin_vote(poll_id, option_id))
            .await
            .ok_or(ClientError::Cancelled)??;
        let Some(pending) = pending else {
            return Ok(false);
        };

        let result = self.backend.vote(&self.group_id, poll_id, option_id, &self.session.user_id).await;
        let accepted = result.is_ok();
        self.shared.update(|s| s.polls.finish_vote(&pending, accepted)).await;
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("[GROUP_VIEW] Vote on poll {} failed: {}", poll_id, e);
                self.shared.record_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn create_poll(&self, question: &str, options: &[String], anonymous: bool) -> ClientResult<()> {
        self.ensure_mounted()?;
        let request = polls::validate_new_poll(question, options, anonymous)?;
        if let Err(e) = self.backend.create_poll(&self.group_id, &request).await {
            self.shared.record_error(&e).await;
            return Err(e);
        }
        self.refresh_polls().await
    }

    /// Renames the poll and its options, then reloads the poll list.
    pub async fn edit_poll(&self, poll_id: &str, question: &str, options: &[String]) -> ClientResult<()> {
        self.ensure_mounted()?;
        let request = self
            .read(|s| s.polls.poll(poll_id).map(|p| polls::validate_poll_edit(p, question, options)))
            .await
            .ok_or_else(|| ClientError::validation(format!("unknown poll {}", poll_id)))??;
        if let Err(e) = self.backend.update_poll(&self.group_id, poll_id, &request).await {
            self.shared.record_error(&e).await;
            return Err(e);
        }
        self.refresh_polls().await
    }

    /// Deletes a poll after the user confirms. Returns false when cancelled.
    pub async fn delete_poll(&self, poll_id: &str, confirm: &dyn Confirm) -> ClientResult<bool> {
        self.ensure_mounted()?;
        let question = self
            .read(|s| s.polls.poll(poll_id).map(|p| p.question.clone()))
            .await
            .ok_or_else(|| ClientError::validation(format!("unknown poll {}", poll_id)))?;
        if !confirm.confirm(&format!("Delete poll \"{}\"?", question)) {
            return Ok(false);
        }
        if let Err(e) = self.backend.delete_poll(&self.group_id, poll_id).await {
            self.shared.record_error(&e).await;
            return Err(e);
        }
        if self.shared.update(|s| s.polls.remove(poll_id)).await.is_some() {
            self.shared.emit(GroupEvent::PollsRefreshed);
        }
        Ok(true)
    }

    pub async fn refresh_polls(&self) -> ClientResult<()> {
        self.ensure_mounted()?;
        let list = self.backend.fetch_polls(&self.group_id).await?;
        if self.shared.update(|s| s.polls.replace_all(list)).await.is_some() {
            self.shared.emit(GroupEvent::PollsRefreshed);
        }
        Ok(())
    }

    /// Reloads the trip details, e.g. after members were added.
    pub async fn refresh_group(&self) -> ClientResult<()> {
        self.ensure_mounted()?;
        let group = self.backend.fetch_group(&self.group_id).await?;
        self.shared.update(|s| s.group = group).await.ok_or(ClientError::Cancelled)
    }

    /// Adds a task. An empty assignee means the current user.
    pub async fn add_checklist_item(&self, task: &str, assigned_to: &str, due_date: Option<String>) -> ClientResult<ChecklistItem> {
        self.ensure_mounted()?;
        let assignee = if assigned_to.trim().is_empty() { self.session.user_id.as_str() } else { assigned_to.trim() };
        let mut item = ChecklistItem::new(task.trim(), assignee);
        item.due_date = due_date;
        checklist::validate_item(&item)?;
        let created = self.backend.add_checklist_item(&self.group_id, &item).await?;
        self.store_item(created.clone()).await;
        Ok(created)
    }

    pub async fn edit_checklist_item(&self, item_id: i64, task: &str, assigned_to: Option<&str>) -> ClientResult<ChecklistItem> {
        self.ensure_mounted()?;
        let mut item = self
            .read(|s| s.checklist.item(item_id).cloned())
            .await
            .ok_or_else(|| ClientError::validation(format!("unknown checklist item {}", item_id)))?;
        item.task = task.trim().to_string();
        if let Some(assignee) = assigned_to {
            item.assigned_to = assignee.trim().to_string();
        }
        checklist::validate_item(&item)?;
        let updated = self.backend.update_checklist_item(&self.group_id, item_id, &item).await?;
        self.store_item(updated.clone()).await;
        Ok(updated)
    }

    /// Optimistic toggle, reverted if the backend refuses. Returns the new state.
    pub async fn toggle_checklist_item(&self, item_id: i64) -> ClientResult<bool> {
        self.ensure_mounted()?;
        let done = self
            .shared
            .update(|s| s.checklist.toggle(item_id))
            .await
            .ok_or(ClientError::Cancelled)?
            .ok_or_else(|| ClientError::validation(format!("unknown checklist item {}", item_id)))?;
        self.shared.emit(GroupEvent::ChecklistChanged);

        if let Err(e) = self.backend.toggle_checklist_item(&self.group_id, item_id).await {
            warn!("[GROUP_VIEW] Toggle of item {} failed: {}", item_id, e);
            if self.shared.update(|s| s.checklist.revert_toggle(item_id, done)).await.is_some() {
                self.shared.emit(GroupEvent::ChecklistChanged);
            }
            self.shared.record_error(&e).await;
            return Err(e);
        }
        Ok(done)
    }

    pub async fn delete_checklist_item(&self, item_id: i64) -> ClientResult<()> {
        self.ensure_mounted()?;
        self.backend.delete_checklist_item(&self.group_id, item_id).await?;
        if let Some(true) = self.shared.update(|s| s.checklist.remove(item_id)).await {
            self.shared.emit(GroupEvent::ChecklistChanged);
        }
        Ok(())
    }

    async fn store_item(&self, item: ChecklistItem) {
        if self.shared.update(|s| s.checklist.upsert(item)).await.is_some() {
            self.shared.emit(GroupEvent::ChecklistChanged);
        }
    }

    /// Stops the pump, closes the channel and freezes the state. Idempotent.
    pub async fn unmount(&self) {
        if !self.shared.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        // waits for any mutation already past the mounted check
        self.shared.state.lock().await.phase = ViewPhase::Unmounted;
        if let Some(handle) = self.take_pump() {
            handle.abort();
        }
        self.channel.close().await;
        self.shared.emit(GroupEvent::Unmounted);
        info!("[GROUP_VIEW] Unmounted group {}", self.group_id);
    }

    fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for GroupView {
    fn drop(&mut self) {
        if !self.shared.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.take_pump() {
            handle.abort();
        }
        if let Ok(mut state) = self.shared.state.try_lock() {
            state.phase = ViewPhase::Unmounted;
        }
        debug!("[GROUP_VIEW] Dropped group {} without unmount", self.group_id);
    }
}
