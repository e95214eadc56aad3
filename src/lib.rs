//! Replay Sync - windowed delta history for multiplayer input
//!
//! The library is the temporal record/replay engine ([`history`]) and its
//! input-state instantiation ([`input`]). The remaining modules make up the
//! relay server binary that consumes it:
//! - WebSocket connections streaming packed input history
//! - Rooms replaying every player's input on a fixed tick
//! - HTTP endpoints for health and room listing

pub mod app;
pub mod config;
pub mod history;
pub mod http;
pub mod input;
pub mod room;
pub mod util;
pub mod ws;
