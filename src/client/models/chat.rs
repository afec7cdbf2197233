use std::collections::{HashSet, VecDeque};

use crate::client::services::message_parser::format_time;
use crate::client::utils::session_store::Session;
use crate::common::protocol::MAX_MESSAGE_SIZE;
use crate::common::{ChatMessage, ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

/// A chat entry ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub sender: String,
    pub content: String,
    pub time: String,
    pub alignment: Alignment,
    /// Own messages get the highlighted bubble.
    pub highlighted: bool,
}

pub fn alignment_for(message: &ChatMessage, current_user_id: &str) -> Alignment {
    if message.sender_id == current_user_id {
        Alignment::Right
    } else {
        Alignment::Left
    }
}

/// Receipt-ordered message buffer of one group. The buffer always holds the
/// newest messages without gaps. Live appends get `limit` slots on top of
/// whatever history pages were loaded; past that the oldest entries fall off
/// and the history cursor rewinds so they can be fetched again.
#[derive(Debug, Clone)]
pub struct ChatLog {
    group_id: String,
    messages: VecDeque<ChatMessage>,
    ids: HashSet<i64>,
    limit: usize,
    loaded: usize,
    page_size: Option<usize>,
    next_page: u32,
    history_exhausted: bool,
}

impl ChatLog {
    pub fn new(group_id: impl Into<String>, limit: usize) -> Self {
        Self {
            group_id: group_id.into(),
            messages: VecDeque::new(),
            ids: HashSet::new(),
            limit: limit.max(1),
            loaded: 0,
            page_size: None,
            next_page: 0,
            history_exhausted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn history_exhausted(&self) -> bool {
        self.history_exhausted
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    /// Appends a pushed message. Messages for another group, or an id we
    /// already hold, are dropped.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if message.group_id != self.group_id {
            return false;
        }
        if let Some(id) = message.id {
            if !self.ids.insert(id) {
                return false;
            }
        }
        self.messages.push_back(message);
        let capacity = self.limit + self.loaded;
        if self.messages.len() > capacity {
            while self.messages.len() > capacity {
                if let Some(old) = self.messages.pop_front() {
                    if let Some(id) = old.id {
                        self.ids.remove(&id);
                    }
                }
            }
            self.rewind();
        }
        true
    }

    /// Points the cursor at the page holding the newest message we no longer
    /// have. Pages count back from the newest message, so overlap with what
    /// is held is dropped as duplicates on the next load.
    fn rewind(&mut self) {
        self.next_page = match self.page_size {
            Some(size) => (self.messages.len() / size) as u32,
            None => 0,
        };
        self.history_exhausted = false;
    }

    /// Prepends one page of history (oldest first) and advances the cursor.
    /// A page shorter than `page_size` marks the history as exhausted.
    pub fn prepend_page(&mut self, page: Vec<ChatMessage>, page_size: usize) -> usize {
        if page.len() < page_size {
            self.history_exhausted = true;
        }
        self.page_size = Some(page_size.max(1));
        self.next_page += 1;
        let mut added = 0;
        for message in page.into_iter().rev() {
            if message.group_id != self.group_id {
                continue;
            }
            if let Some(id) = message.id {
                if !self.ids.insert(id) {
                    continue;
                }
            }
            self.messages.push_front(message);
            added += 1;
        }
        self.loaded += added;
        added
    }

    /// Builds the outgoing message for `text`. `Ok(None)` when there is nothing to send.
    pub fn compose(&self, text: &str, session: &Session) -> ClientResult<Option<ChatMessage>> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(None);
        }
        if content.len() > MAX_MESSAGE_SIZE {
            return Err(ClientError::validation(format!("message too long (max {} characters)", MAX_MESSAGE_SIZE)));
        }
        Ok(Some(ChatMessage {
            id: None,
            group_id: self.group_id.clone(),
            sender_id: session.user_id.clone(),
            sender_username: session.username.clone(),
            content: content.to_string(),
            timestamp: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        }))
    }

    pub fn render(&self, current_user_id: &str) -> Vec<ChatLine> {
        self.messages
            .iter()
            .map(|m| {
                let alignment = alignment_for(m, current_user_id);
                ChatLine {
                    sender: m.sender_username.clone(),
                    content: m.content.clone(),
                    time: format_time(m.timestamp.as_deref()),
                    alignment,
                    highlighted: alignment == Alignment::Right,
                }
            })
            .collect()
    }
}
