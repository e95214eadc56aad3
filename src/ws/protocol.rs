//! WebSocket protocol message definitions
//! These are the text-frame types for client-server communication.
//! Binary frames carry packed input history and are not listed here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::input::InputState;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Declare the control layout and its state at the client's clock time.
    /// Must precede any binary history packet.
    Hello {
        /// Client clock, seconds
        time: f64,
        /// Every control the client will report
        controls: InputState,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current room
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        room: String,
        server_time: u64,
        /// Seconds of history the server keeps per player
        window_secs: f64,
    },

    /// Player joined the room
    PlayerJoined { player: PlayerInfo },

    /// Player left the room
    PlayerLeft { user_id: Uuid, reason: String },

    /// Replayed input of every player (sent at regular intervals)
    Snapshot {
        /// Room tick number
        tick: u64,
        /// Seconds since the room started
        server_time: f64,
        players: Vec<PlayerSnapshot>,
    },

    /// Button edges observed during one tick
    Edges { tick: u64, events: Vec<EdgeEvent> },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Player info for room membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub display_name: String,
}

/// One player's replayed input in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: Uuid,
    /// Client clock time the input was replayed to
    pub time: f64,
    pub input: InputState,
}

/// Which edge a button crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Pressed,
    Released,
}

/// A button edge seen while replaying a player's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub user_id: Uuid,
    pub control: String,
    pub edge: Edge,
    /// Client clock time of the step that produced the edge
    pub time: f64,
}
