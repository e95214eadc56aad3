//! Snapshot pacing and assembly

use std::collections::HashMap;
use uuid::Uuid;

use crate::ws::protocol::{PlayerSnapshot, ServerMsg};

use super::relay::PlayerFeed;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used when membership changes)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Build a snapshot message from every player that has sent a hello
    pub fn build(
        &self,
        tick: u64,
        server_time: f64,
        feeds: &HashMap<Uuid, PlayerFeed>,
    ) -> ServerMsg {
        let mut players: Vec<PlayerSnapshot> = feeds
            .iter()
            .map(|(user_id, feed)| PlayerSnapshot {
                user_id: *user_id,
                time: feed.cursor.time(),
                input: feed.cursor.state().clone(),
            })
            .collect();
        players.sort_by_key(|p| p.user_id);

        ServerMsg::Snapshot {
            tick,
            server_time,
            players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_every_interval() {
        let mut builder = SnapshotBuilder::new(3);
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn force_next_sends_immediately() {
        let mut builder = SnapshotBuilder::new(5);
        builder.should_send();
        builder.force_next();
        assert!(builder.should_send());
        assert!(!builder.should_send());
    }

    #[test]
    fn empty_room_builds_empty_snapshot() {
        let builder = SnapshotBuilder::new(1);
        match builder.build(7, 1.0, &HashMap::new()) {
            ServerMsg::Snapshot { tick, players, .. } => {
                assert_eq!(tick, 7);
                assert!(players.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
