//! Client core for the trip planner: session handling, REST services and the
//! realtime group screen (chat, polls, checklist) over STOMP.

pub mod client;
pub mod common;
pub mod utils;
