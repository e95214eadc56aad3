//! Forward-only replay over a history log

use std::sync::Weak;

use parking_lot::RwLock;

use super::error::{HistoryError, HistoryResult};
use super::kind::StateKind;
use super::log::{check_time, HistoryLog};

/// Monotonic reader that materializes a log's state at increasing times.
///
/// The cursor owns its materialized state and only ever reads the log. It
/// holds a weak handle, so it never keeps a log alive. Entries that reach
/// the log after the cursor was opened are picked up by the next
/// [`advance_to`](Self::advance_to).
///
/// A cursor must stay within the log's window: once the log folds an entry
/// the cursor has not consumed, every further advance fails with
/// [`HistoryError::StaleCursor`]. An entry that lands at or before the
/// cursor's time after it got there is reported as
/// [`HistoryError::LateEntry`]. Either way the cursor has to be reopened.
#[derive(Debug)]
pub struct ReplayCursor<K: StateKind> {
    log: Weak<RwLock<HistoryLog<K>>>,
    log_id: u64,
    /// Log generation this cursor's state accounts for
    seen: u64,
    state: K::State,
    time: f64,
}

impl<K: StateKind> ReplayCursor<K> {
    pub(super) fn attached(log: Weak<RwLock<HistoryLog<K>>>, source: &HistoryLog<K>, start: f64) -> Self {
        let (state, time) = materialize(source, start);
        Self {
            log,
            log_id: source.id(),
            seen: source.generation(),
            state,
            time,
        }
    }

    pub(super) fn detached(source: &HistoryLog<K>, start: f64) -> Self {
        Self::attached(Weak::new(), source, start)
    }

    /// Move forward to `target` on the log this cursor was opened from.
    pub fn advance_to(&mut self, target: f64) -> HistoryResult<&K::State> {
        let log = self.log.upgrade().ok_or(HistoryError::LogClosed)?;
        let log = log.read();
        self.step(&log, target)?;
        Ok(&self.state)
    }

    /// Move forward to `target` over an explicitly borrowed log.
    ///
    /// The log must be the one the cursor was opened on; any other log
    /// yields [`HistoryError::ForeignLog`].
    pub fn advance_in(&mut self, log: &HistoryLog<K>, target: f64) -> HistoryResult<&K::State> {
        if log.id() != self.log_id {
            return Err(HistoryError::ForeignLog);
        }
        self.step(log, target)?;
        Ok(&self.state)
    }

    /// State materialized at [`time`](Self::time).
    pub fn state(&self) -> &K::State {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Whether the log behind this cursor still exists.
    pub fn is_attached(&self) -> bool {
        self.log.strong_count() > 0
    }

    fn step(&mut self, log: &HistoryLog<K>, target: f64) -> HistoryResult<()> {
        check_time(target)?;

        if target < self.time {
            return Err(HistoryError::Rewind {
                cursor_time: self.time,
                requested: target,
            });
        }

        if let Some(pruned_through) = log.pruned_through().filter(|&t| t > self.time) {
            return Err(HistoryError::StaleCursor {
                cursor_time: self.time,
                pruned_through,
            });
        }

        if let Some(entry_time) = log.inserted_since(self.seen, self.time) {
            return Err(HistoryError::LateEntry {
                cursor_time: self.time,
                entry_time,
            });
        }

        // Same target twice: nothing new can be in (time, target].
        if target == self.time {
            return Ok(());
        }

        let kind = log.kind();
        kind.before_step(&mut self.state);

        let entries = log.entries();
        let from = entries.partition_point(|e| e.time <= self.time);
        for entry in entries.range(from..) {
            if entry.time > target {
                break;
            }
            self.state = kind.apply(&self.state, &entry.delta);
        }

        self.time = target;
        self.seen = log.generation();
        Ok(())
    }
}

/// Fold the log's base forward to `start` (clamped to the retained range).
/// Edge flags reflect only entries stamped exactly at the start time.
fn materialize<K: StateKind>(log: &HistoryLog<K>, start: f64) -> (K::State, f64) {
    let start = if start >= log.base_time() {
        start
    } else {
        log.base_time()
    };

    let kind = log.kind();
    let mut state = log.base().clone();
    let entries = log.entries();

    let before = entries.partition_point(|e| e.time < start);
    for entry in entries.range(..before) {
        state = kind.apply(&state, &entry.delta);
    }

    kind.before_step(&mut state);
    for entry in entries.range(before..).take_while(|e| e.time <= start) {
        state = kind.apply(&state, &entry.delta);
    }

    (state, start)
}
