//! Input relay rooms

pub mod relay;
pub mod snapshot;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

use crate::input::InputState;
use crate::ws::protocol::ServerMsg;

pub use relay::{PlayerFeed, Room, RoomSettings};

/// Event delivered from a connection to its room
#[derive(Debug)]
pub enum RoomEvent {
    Join {
        user_id: Uuid,
        display_name: String,
        /// Channel for messages addressed to this player only
        reply_tx: mpsc::Sender<ServerMsg>,
    },
    Hello {
        user_id: Uuid,
        time: f64,
        controls: InputState,
    },
    /// A packed input history payload
    Packet { user_id: Uuid, payload: Bytes },
    Leave { user_id: Uuid },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub event_tx: mpsc::Sender<RoomEvent>,
    pub broadcast_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.broadcast_tx.subscribe()
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    settings: RoomSettings,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    /// Return the room with this id, spawning it if needed.
    /// The room removes itself from the registry when its task ends.
    pub fn get_or_open(self: &Arc<Self>, id: &str) -> RoomHandle {
        if let Some(handle) = self.get(id) {
            return handle;
        }

        let (room, handle) = Room::new(id.to_string(), self.settings.clone());
        let handle = match self.rooms.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => return existing.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => slot.insert(handle).value().clone(),
        };

        let registry = Arc::clone(self);
        let room_id = id.to_string();
        let event_tx = handle.event_tx.clone();
        tokio::spawn(async move {
            room.run().await;
            registry
                .rooms
                .remove_if(&room_id, |_, h| h.event_tx.same_channel(&event_tx));
            info!(room = %room_id, "Room removed from registry");
        });

        handle
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    /// Room ids with their player counts, sorted by id
    pub fn list(&self) -> Vec<(String, usize)> {
        let mut rooms: Vec<(String, usize)> = self
            .rooms
            .iter()
            .map(|r| (r.key().clone(), r.value().player_count()))
            .collect();
        rooms.sort();
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<RoomRegistry> {
        Arc::new(RoomRegistry::new(RoomSettings {
            window_secs: 2.0,
            playout_delay_secs: 0.05,
            max_players: 4,
        }))
    }

    #[tokio::test]
    async fn get_or_open_reuses_rooms() {
        let registry = registry();
        let a = registry.get_or_open("lobby");
        let b = registry.get_or_open("lobby");
        assert!(a.event_tx.same_channel(&b.event_tx));

        registry.get_or_open("other");
        assert_eq!(registry.active_rooms(), 2);
        assert_eq!(
            registry.list(),
            vec![("lobby".to_string(), 0), ("other".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn joined_player_is_counted() {
        let registry = registry();
        let handle = registry.get_or_open("lobby");
        let mut updates = handle.subscribe();
        let (reply_tx, _reply_rx) = mpsc::channel(8);
        handle
            .event_tx
            .send(RoomEvent::Join {
                user_id: Uuid::new_v4(),
                display_name: "p1".into(),
                reply_tx,
            })
            .await
            .unwrap();

        loop {
            if let ServerMsg::PlayerJoined { player } = updates.recv().await.unwrap() {
                assert_eq!(player.display_name, "p1");
                break;
            }
        }
        assert_eq!(registry.total_players(), 1);
    }
}
