use std::collections::HashMap;

use crate::common::{ClientError, ClientResult, CreatePollRequest, Poll, PollUpdate, UpdatePollOption, UpdatePollRequest, UserVote};

/// Share of `count` in `total` as a percentage, 0 when nobody voted.
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Checks the create form and returns the request to submit.
/// Blank options are dropped; at least two must remain.
pub fn validate_new_poll(question: &str, options: &[String], anonymous: bool) -> ClientResult<CreatePollRequest> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ClientError::validation("poll question is required"));
    }
    let options: Vec<String> = options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < 2 {
        return Err(ClientError::validation("a poll needs at least two options"));
    }
    Ok(CreatePollRequest { question: question.to_string(), options, anonymous })
}

/// Renames a poll and its options. Texts map onto the existing options in order,
/// so votes stay attached to the option they were cast for.
pub fn validate_poll_edit(poll: &Poll, question: &str, texts: &[String]) -> ClientResult<UpdatePollRequest> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ClientError::validation("poll question is required"));
    }
    let texts: Vec<&str> = texts.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
    if texts.len() != poll.options.len() {
        return Err(ClientError::validation(format!(
            "poll has {} options, {} given",
            poll.options.len(),
            texts.len()
        )));
    }
    let options = poll
        .options
        .iter()
        .zip(texts)
        .map(|(o, text)| UpdatePollOption { option_id: o.option_id.clone(), option_text: text.to_string() })
        .collect();
    Ok(UpdatePollRequest { question: question.to_string(), options })
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionLine {
    pub option_id: String,
    pub text: String,
    pub votes: u64,
    pub percent: f64,
    pub selected: bool,
}

/// A vote applied locally and not yet confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVote {
    pub poll_id: String,
    pub option_id: String,
    previous: Option<String>,
}

/// Polls of one group plus the current user's selections.
#[derive(Debug, Clone, Default)]
pub struct PollBoard {
    polls: Vec<Poll>,
    versions: HashMap<String, u64>,
    selections: HashMap<String, String>,
    in_flight: HashMap<String, String>,
}

impl PollBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn polls(&self) -> &[Poll] {
        &self.polls
    }

    pub fn poll(&self, poll_id: &str) -> Option<&Poll> {
        self.polls.iter().find(|p| p.poll_id == poll_id)
    }

    pub fn selection(&self, poll_id: &str) -> Option<&str> {
        self.selections.get(poll_id).map(String::as_str)
    }

    pub fn is_pending(&self, poll_id: &str) -> bool {
        self.in_flight.contains_key(poll_id)
    }

    /// Replaces the list with a fresh fetch. Known versions are kept so an
    /// older push arriving after the refresh is still rejected.
    pub fn replace_all(&mut self, polls: Vec<Poll>) {
        self.selections.retain(|poll_id, _| polls.iter().any(|p| &p.poll_id == poll_id));
        self.versions.retain(|poll_id, _| polls.iter().any(|p| &p.poll_id == poll_id));
        self.polls = polls;
    }

    /// Marks the options the user already voted for, skipping polls with a vote in flight.
    pub fn preselect(&mut self, votes: &[UserVote]) {
        for vote in votes {
            if self.poll(&vote.poll_id).is_none() || self.in_flight.contains_key(&vote.poll_id) {
                continue;
            }
            self.selections.insert(vote.poll_id.clone(), vote.option_id.clone());
        }
    }

    /// Applies the selection locally. `Ok(None)` means there is nothing to
    /// submit: the same vote is already in flight or already recorded.
    pub fn begin_vote(&mut self, poll_id: &str, option_id: &str) -> ClientResult<Option<PendingVote>> {
        let poll = self
            .poll(poll_id)
            .ok_or_else(|| ClientError::validation(format!("unknown poll {}", poll_id)))?;
        if poll.option(option_id).is_none() {
            return Err(ClientError::validation(format!("unknown option {} for poll {}", option_id, poll_id)));
        }
        if self.in_flight.get(poll_id).map(String::as_str) == Some(option_id) {
            return Ok(None);
        }
        if !self.in_flight.contains_key(poll_id) && self.selection(poll_id) == Some(option_id) {
            return Ok(None);
        }
        let previous = self.selections.insert(poll_id.to_string(), option_id.to_string());
        self.in_flight.insert(poll_id.to_string(), option_id.to_string());
        Ok(Some(PendingVote { poll_id: poll_id.to_string(), option_id: option_id.to_string(), previous }))
    }

    /// Settles a pending vote. On failure the selection goes back to what it
    /// was, unless the user picked something else in the meantime.
    pub fn finish_vote(&mut self, pending: &PendingVote, accepted: bool) {
        if self.in_flight.get(&pending.poll_id) == Some(&pending.option_id) {
            self.in_flight.remove(&pending.poll_id);
        }
        if accepted || self.selection(&pending.poll_id) != Some(pending.option_id.as_str()) {
            return;
        }
        match &pending.previous {
            Some(previous) => {
                self.selections.insert(pending.poll_id.clone(), previous.clone());
            }
            None => {
                self.selections.remove(&pending.poll_id);
            }
        }
    }

    /// Applies a pushed tally. Returns false when the poll is unknown or the
    /// update is not newer than the last one applied.
    pub fn apply_update(&mut self, update: &PollUpdate) -> bool {
        let Some(index) = self.polls.iter().position(|p| p.poll_id == update.poll_id) else {
            return false;
        };
        if let Some(version) = update.version {
            if self.versions.get(&update.poll_id).is_some_and(|held| *held >= version) {
                return false;
            }
            self.versions.insert(update.poll_id.clone(), version);
        }
        let poll = &mut self.polls[index];
        for tally in &update.options {
            if let Some(option) = poll.options.iter_mut().find(|o| o.option_id == tally.option_id) {
                option.vote_count = tally.vote_count;
            }
        }
        true
    }

    pub fn remove(&mut self, poll_id: &str) -> bool {
        let before = self.polls.len();
        self.polls.retain(|p| p.poll_id != poll_id);
        self.selections.remove(poll_id);
        self.versions.remove(poll_id);
        self.in_flight.remove(poll_id);
        self.polls.len() != before
    }

    pub fn render(&self, poll_id: &str) -> Vec<OptionLine> {
        let Some(poll) = self.poll(poll_id) else {
            return Vec::new();
        };
        let total = poll.total_votes();
        let selected = self.selection(poll_id);
        poll.options
            .iter()
            .map(|o| OptionLine {
                option_id: o.option_id.clone(),
                text: o.option_text.clone(),
                votes: o.vote_count,
                percent: percentage(o.vote_count, total),
                selected: selected == Some(o.option_id.as_str()),
            })
            .collect()
    }
}
