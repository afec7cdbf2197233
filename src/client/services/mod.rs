pub mod api_client;
pub mod auth_service;
pub mod flights_service;
pub mod groups_service;
pub mod message_parser;
pub mod users_service;
pub mod websocket_client;
