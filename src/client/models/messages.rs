use crate::client::services::websocket_client::ChannelStatus;
use crate::common::{ChatMessage, PollUpdate};

/// What a mounted group view reports to whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    ChatReceived(ChatMessage),
    PollUpdated(PollUpdate),
    /// A push arrived for a poll we do not hold or was older than what we have.
    PollUpdateIgnored { poll_id: String },
    StatusChanged(ChannelStatus),
    PollsRefreshed,
    ChecklistChanged,
    Error(String),
    Unmounted,
}
