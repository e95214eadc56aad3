//! Room state and relay tick loop
//!
//! Each player streams packed input history into a per-player log. Every
//! tick the room walks each player's cursor forward to a playout point a
//! little behind the newest data it holds, reports button edges, and
//! periodically broadcasts the replayed input of everyone in the room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::history::{HistoryLog, ReplayCursor, SharedLog};
use crate::input::{Control, InputKind, InputState};
use crate::util::time::{SessionClock, SIMULATION_TPS, SNAPSHOT_TPS, TICK_DURATION_MICROS};
use crate::ws::protocol::{Edge, EdgeEvent, PlayerInfo, ServerMsg};

use super::snapshot::SnapshotBuilder;
use super::{RoomEvent, RoomHandle};

/// Rooms nobody ever joined close after this many ticks
const IDLE_ROOM_TICKS: u64 = SIMULATION_TPS as u64 * 10;

/// Per-room knobs derived from [`Config`]
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub window_secs: f64,
    pub playout_delay_secs: f64,
    pub max_players: usize,
}

impl From<&Config> for RoomSettings {
    fn from(config: &Config) -> Self {
        Self {
            window_secs: config.history_window_secs,
            playout_delay_secs: config.playout_delay_secs,
            max_players: config.max_room_players,
        }
    }
}

/// A player's input history and the cursor replaying it
pub struct PlayerFeed {
    pub log: SharedLog<InputKind>,
    pub cursor: ReplayCursor<InputKind>,
}

impl PlayerFeed {
    pub fn new(controls: InputState, time: f64, window_secs: f64) -> Self {
        let log = SharedLog::new(HistoryLog::new(InputKind::new(), controls, time, window_secs));
        let cursor = log.begin_walk(time);
        Self { log, cursor }
    }

    /// Walk the cursor to the playout point and collect button edges.
    ///
    /// A cursor the log has moved out from under (folded or late history)
    /// is reopened at the playout point, so it agrees with the log again.
    fn step(&mut self, user_id: Uuid, playout_delay: f64) -> Vec<EdgeEvent> {
        let target = self.log.head_time() - playout_delay;
        if target <= self.cursor.time() {
            return Vec::new();
        }

        match self.cursor.advance_to(target) {
            Ok(state) => edges_of(user_id, target, state),
            Err(e) if e.needs_new_cursor() => {
                warn!(user_id = %user_id, error = %e, "Replay cursor out of date, reopening");
                self.cursor = self.log.begin_walk(target);
                edges_of(user_id, target, self.cursor.state())
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Replay cursor failed");
                Vec::new()
            }
        }
    }
}

fn edges_of(user_id: Uuid, time: f64, state: &InputState) -> Vec<EdgeEvent> {
    let mut events = Vec::new();
    for (name, control) in state.controls() {
        let Control::Button(button) = control else {
            continue;
        };
        for (flag, edge) in [(button.pressed, Edge::Pressed), (button.released, Edge::Released)] {
            if flag {
                events.push(EdgeEvent {
                    user_id,
                    control: name.to_string(),
                    edge,
                    time,
                });
            }
        }
    }
    events
}

struct Member {
    display_name: String,
    reply_tx: mpsc::Sender<ServerMsg>,
}

/// The relay room (owned by its task)
pub struct Room {
    id: String,
    settings: RoomSettings,
    tick: u64,
    clock: SessionClock,
    members: HashMap<Uuid, Member>,
    feeds: HashMap<Uuid, PlayerFeed>,
    had_members: bool,
    event_rx: mpsc::Receiver<RoomEvent>,
    broadcast_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
}

impl Room {
    /// Create a new room
    pub fn new(id: String, settings: RoomSettings) -> (Self, RoomHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (broadcast_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: id.clone(),
            event_tx,
            broadcast_tx: broadcast_tx.clone(),
            player_count: player_count.clone(),
        };

        let room = Self {
            id,
            settings,
            tick: 0,
            clock: SessionClock::new(),
            members: HashMap::new(),
            feeds: HashMap::new(),
            had_members: false,
            event_rx,
            broadcast_tx,
            snapshot_builder: SnapshotBuilder::new(SIMULATION_TPS / SNAPSHOT_TPS),
            player_count,
        };

        (room, handle)
    }

    /// Run the relay tick loop until the room empties
    pub async fn run(mut self) {
        info!(room = %self.id, "Room opened");

        let mut tick_interval = interval(Duration::from_micros(TICK_DURATION_MICROS));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain event queue
            while let Ok(event) = self.event_rx.try_recv() {
                self.handle_event(event);
            }

            let events = self.run_tick();
            if !events.is_empty() {
                let _ = self.broadcast_tx.send(ServerMsg::Edges {
                    tick: self.tick,
                    events,
                });
            }

            if self.snapshot_builder.should_send() {
                let snapshot =
                    self.snapshot_builder
                        .build(self.tick, self.clock.now_secs(), &self.feeds);
                let _ = self.broadcast_tx.send(snapshot);
            }

            if self.is_finished() {
                info!(room = %self.id, ticks = self.tick, "Room closed");
                break;
            }
        }
    }

    pub fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join {
                user_id,
                display_name,
                reply_tx,
            } => self.handle_join(user_id, display_name, reply_tx),
            RoomEvent::Hello {
                user_id,
                time,
                controls,
            } => self.handle_hello(user_id, time, controls),
            RoomEvent::Packet { user_id, payload } => self.handle_packet(user_id, payload),
            RoomEvent::Leave { user_id } => self.handle_leave(user_id),
        }
    }

    /// Advance every player's replay by one tick; returns the edges seen
    pub fn run_tick(&mut self) -> Vec<EdgeEvent> {
        self.tick += 1;
        let delay = self.settings.playout_delay_secs;

        let mut events = Vec::new();
        for (user_id, feed) in self.feeds.iter_mut() {
            events.extend(feed.step(*user_id, delay));
        }
        events
    }

    pub fn feed(&self, user_id: &Uuid) -> Option<&PlayerFeed> {
        self.feeds.get(user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_finished(&self) -> bool {
        if self.had_members {
            self.members.is_empty()
        } else {
            self.tick >= IDLE_ROOM_TICKS
        }
    }

    fn handle_join(&mut self, user_id: Uuid, display_name: String, reply_tx: mpsc::Sender<ServerMsg>) {
        if self.members.contains_key(&user_id) {
            warn!(room = %self.id, user_id = %user_id, "Player already in room");
            return;
        }

        if self.members.len() >= self.settings.max_players {
            let _ = reply_tx.try_send(ServerMsg::error("room_full", "Room is full"));
            return;
        }

        let player = PlayerInfo {
            user_id,
            display_name: display_name.clone(),
        };

        self.members.insert(
            user_id,
            Member {
                display_name,
                reply_tx,
            },
        );
        self.had_members = true;
        self.player_count.store(self.members.len(), Ordering::Relaxed);

        let _ = self.broadcast_tx.send(ServerMsg::PlayerJoined { player });

        info!(
            room = %self.id,
            user_id = %user_id,
            player_count = self.members.len(),
            "Player joined room"
        );
    }

    fn handle_hello(&mut self, user_id: Uuid, time: f64, controls: InputState) {
        let Some(member) = self.members.get(&user_id) else {
            debug!(room = %self.id, user_id = %user_id, "Hello from non-member ignored");
            return;
        };

        if !time.is_finite() {
            let _ = member
                .reply_tx
                .try_send(ServerMsg::error("bad_hello", "hello time must be finite"));
            return;
        }

        let controls_count = controls.len();
        let replaced = self
            .feeds
            .insert(user_id, PlayerFeed::new(controls, time, self.settings.window_secs))
            .is_some();
        self.snapshot_builder.force_next();

        info!(
            room = %self.id,
            user_id = %user_id,
            name = %member.display_name,
            controls = controls_count,
            replaced,
            "Input feed started"
        );
    }

    fn handle_packet(&mut self, user_id: Uuid, payload: Bytes) {
        let Some(member) = self.members.get(&user_id) else {
            debug!(room = %self.id, user_id = %user_id, "Packet from non-member ignored");
            return;
        };

        let Some(feed) = self.feeds.get(&user_id) else {
            let _ = member
                .reply_tx
                .try_send(ServerMsg::error("no_hello", "send hello before input history"));
            return;
        };

        match feed.log.unpack(&payload) {
            Ok(report) => {
                if report.duplicates > 0 || report.stale > 0 {
                    debug!(
                        user_id = %user_id,
                        accepted = report.accepted,
                        duplicates = report.duplicates,
                        stale = report.stale,
                        "Merged input history"
                    );
                }
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, bytes = payload.len(), "Rejected input history");
                let _ = member
                    .reply_tx
                    .try_send(ServerMsg::error("malformed_payload", e.to_string()));
            }
        }
    }

    fn handle_leave(&mut self, user_id: Uuid) {
        if self.members.remove(&user_id).is_none() {
            return;
        }
        let feed = self.feeds.remove(&user_id);
        self.player_count.store(self.members.len(), Ordering::Relaxed);
        self.snapshot_builder.force_next();

        let _ = self.broadcast_tx.send(ServerMsg::PlayerLeft {
            user_id,
            reason: "disconnected".to_string(),
        });

        info!(
            room = %self.id,
            user_id = %user_id,
            history = ?feed.map(|f| f.log.stats()),
            "Player left room"
        );
    }
}
