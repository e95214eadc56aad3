//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::room::{RoomEvent, RoomHandle};
use crate::util::rate_limit::PacketRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

const DEFAULT_ROOM: &str = "lobby";
const MAX_NAME_LEN: usize = 32;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room to join
    #[serde(default)]
    pub room: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let room = query
        .room
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());

    let user_id = Uuid::new_v4();
    let display_name = query
        .name
        .map(|n| n.trim().chars().take(MAX_NAME_LEN).collect::<String>())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Player_{}", &user_id.to_string()[..8]));

    info!(user_id = %user_id, room = %room, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, display_name, room, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    user_id: Uuid,
    display_name: String,
    room_id: String,
    state: AppState,
) {
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let room = state.rooms.get_or_open(&room_id);
    if room.player_count() >= state.config.max_room_players {
        let _ = send_msg(&mut ws_sink, &ServerMsg::error("room_full", "Room is full")).await;
        return;
    }

    // Send welcome message
    let welcome = ServerMsg::Welcome {
        user_id,
        room: room_id.clone(),
        server_time: unix_millis(),
        window_secs: state.config.history_window_secs,
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    // Subscribe before joining so our own join notice is delivered
    let room_rx = room.subscribe();
    let (reply_tx, reply_rx) = mpsc::channel::<ServerMsg>(32);

    let join = RoomEvent::Join {
        user_id,
        display_name,
        reply_tx: reply_tx.clone(),
    };
    if room.event_tx.send(join).await.is_err() {
        warn!(user_id = %user_id, room = %room_id, "Room closed before join");
        let _ = send_msg(&mut ws_sink, &ServerMsg::error("room_closed", "Room is closing, retry")).await;
        return;
    }

    let limiter = PacketRateLimiter::new(state.config.input_rate_limit);

    // Run the session with split read/write
    run_session(user_id, &room, limiter, ws_sink, ws_stream, reply_tx, reply_rx, room_rx).await;

    // Cleanup on disconnect
    let _ = room.event_tx.send(RoomEvent::Leave { user_id }).await;

    info!(user_id = %user_id, room = %room_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
#[allow(clippy::too_many_arguments)]
async fn run_session(
    user_id: Uuid,
    room: &RoomHandle,
    limiter: PacketRateLimiter,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    reply_tx: mpsc::Sender<ServerMsg>,
    mut reply_rx: mpsc::Receiver<ServerMsg>,
    mut room_rx: broadcast::Receiver<ServerMsg>,
) {
    // Spawn writer task: room broadcasts and direct replies -> WebSocket
    let writer_user_id = user_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = reply_rx.recv() => msg,
                result = room_rx.recv() => match result {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            user_id = %writer_user_id,
                            lagged_count = n,
                            "Client lagged, skipping {} room messages", n
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(user_id = %writer_user_id, "Room channel closed");
                        break;
                    }
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %writer_user_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> room
    while let Some(result) = ws_stream.next().await {
        let event = match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(ClientMsg::Hello { time, controls }) => RoomEvent::Hello {
                    user_id,
                    time,
                    controls,
                },
                Ok(ClientMsg::Ping { t }) => {
                    let _ = reply_tx.send(ServerMsg::Pong { t }).await;
                    continue;
                }
                Ok(ClientMsg::Leave) => {
                    info!(user_id = %user_id, "Client left room");
                    break;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                    let _ = reply_tx
                        .send(ServerMsg::error("bad_message", e.to_string()))
                        .await;
                    continue;
                }
            },
            Ok(Message::Binary(data)) => match packet_event(user_id, &limiter, data) {
                Ok(event) => event,
                Err(reply) => {
                    warn!(user_id = %user_id, "Rate limited history packet");
                    let _ = reply_tx.send(reply).await;
                    continue;
                }
            },
            Ok(Message::Ping(_)) => {
                debug!(user_id = %user_id, "Received ping");
                continue;
            }
            Ok(Message::Pong(_)) => {
                debug!(user_id = %user_id, "Received pong");
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        };

        if room.event_tx.send(event).await.is_err() {
            debug!(user_id = %user_id, "Room channel closed");
            break;
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Turn a binary frame into a room event.
///
/// Over quota the packet is dropped and the returned error tells the client
/// to re-send its history with an explicit `since`; incremental packing
/// would otherwise never repeat the lost entries.
fn packet_event(user_id: Uuid, limiter: &PacketRateLimiter, data: Vec<u8>) -> Result<RoomEvent, ServerMsg> {
    if !limiter.check_packet() {
        return Err(ServerMsg::error(
            "rate_limited",
            "history packet dropped, re-send from the last acknowledged time",
        ));
    }
    Ok(RoomEvent::Packet {
        user_id,
        payload: Bytes::from(data),
    })
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_over_quota_are_answered() {
        let user_id = Uuid::new_v4();
        let limiter = PacketRateLimiter::new(1);

        match packet_event(user_id, &limiter, b"[]".to_vec()) {
            Ok(RoomEvent::Packet { user_id: id, payload }) => {
                assert_eq!(id, user_id);
                assert_eq!(&payload[..], b"[]");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        match packet_event(user_id, &limiter, b"[]".to_vec()) {
            Err(ServerMsg::Error { code, .. }) => assert_eq!(code, "rate_limited"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
