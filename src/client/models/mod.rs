pub mod chat;
pub mod checklist;
pub mod group_view;
pub mod messages;
pub mod polls;
