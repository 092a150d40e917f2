//! Real-time discussion server for ForumX: a WebSocket chat gateway with
//! persisted history, a WebRTC signaling relay, and the HTTP history API.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod discussion;
pub mod messages;
pub mod registry;
pub mod signal;
pub mod store;
