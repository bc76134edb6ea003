//! Background daemon binding the command socket and WebSocket endpoint to
//! the PR ingestion poller and the session-registry sweeper.

pub mod daemon;
pub mod poller;
pub mod session_registry;
