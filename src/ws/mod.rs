//! WebSocket endpoint and wire messages

pub mod handler;
pub mod protocol;
