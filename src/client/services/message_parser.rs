// Parsing of realtime push bodies
use chrono::{DateTime, Local};
use serde::Deserialize;

use crate::common::{ChatMessage, ClientError, ClientResult, OptionTally, Poll, PollUpdate};

pub fn parse_chat_message(body: &str) -> ClientResult<ChatMessage> {
    let message: ChatMessage = serde_json::from_str(body)
        .map_err(|e| ClientError::Protocol(format!("invalid chat message: {}", e)))?;
    Ok(message)
}

/// The poll topic carries either a tally update or the whole poll.
#[derive(Deserialize)]
#[serde(untagged)]
enum PollPush {
    Update(PollUpdate),
    Full(Poll),
}

pub fn parse_poll_update(body: &str) -> ClientResult<PollUpdate> {
    let push: PollPush = serde_json::from_str(body)
        .map_err(|e| ClientError::Protocol(format!("invalid poll update: {}", e)))?;
    Ok(match push {
        PollPush::Update(update) => update,
        PollPush::Full(poll) => PollUpdate {
            poll_id: poll.poll_id,
            version: None,
            options: poll
                .options
                .into_iter()
                .map(|o| OptionTally { option_id: o.option_id, vote_count: o.vote_count })
                .collect(),
        },
    })
}

/// `HH:MM` in local time, empty when the timestamp is missing or unreadable.
pub fn format_time(timestamp: Option<&str>) -> String {
    timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|dt| dt.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default()
}
