//! Windowed delta history
//!
//! A [`HistoryLog`] keeps a folded base snapshot plus the timestamped deltas
//! recorded (or received) since. Entries older than `window` seconds behind
//! the newest known time are folded into the base and discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::cursor::ReplayCursor;
use super::error::{HistoryError, HistoryResult};
use super::kind::StateKind;
use super::wire;

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(1);

/// One timestamped delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<D> {
    #[serde(rename = "t")]
    pub time: f64,
    #[serde(rename = "d")]
    pub delta: D,
}

impl<D> Entry<D> {
    pub fn new(time: f64, delta: D) -> Self {
        Self { time, delta }
    }
}

/// Lifetime counters for a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    /// Deltas appended by `record`
    pub recorded: u64,
    /// `record` calls that produced an empty delta
    pub elided: u64,
    /// Entries merged by `unpack`
    pub unpacked: u64,
    /// Entries skipped by `unpack` because they were already stored
    pub duplicates: u64,
    /// Entries dropped by `record` or `unpack` because they predate the base
    pub stale: u64,
    /// Entries folded into the base
    pub pruned: u64,
}

/// Outcome of a single `unpack` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub stale: usize,
}

/// Append-mostly, time-ordered ledger of deltas over a folded base.
#[derive(Debug)]
pub struct HistoryLog<K: StateKind> {
    id: u64,
    kind: K,
    base: K::State,
    base_time: f64,
    current: K::State,
    current_time: f64,
    window: f64,
    last_pack_time: f64,
    /// Time of the newest entry ever folded into `base`
    pruned_through: Option<f64>,
    entries: VecDeque<Entry<K::Delta>>,
    /// Bumped once per inserted entry
    generation: u64,
    /// `(generation, time)` of every retained entry, in insertion order
    arrivals: VecDeque<(u64, f64)>,
    /// Newest generation among entries folded into `base`
    folded_generation: u64,
    stats: HistoryStats,
}

impl<K: StateKind> HistoryLog<K> {
    /// Create a log whose history starts at `initial` at `start_time`.
    ///
    /// `window` is the retention horizon in seconds. Negative or NaN windows
    /// are treated as zero; an infinite window never prunes.
    pub fn new(kind: K, initial: K::State, start_time: f64, window: f64) -> Self {
        Self {
            id: NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            base: initial.clone(),
            base_time: start_time,
            current: initial,
            current_time: start_time,
            window: window.max(0.0),
            last_pack_time: start_time,
            pruned_through: None,
            entries: VecDeque::new(),
            generation: 0,
            arrivals: VecDeque::new(),
            folded_generation: 0,
            stats: HistoryStats::default(),
        }
    }

    /// Record `state` as observed at `time`.
    ///
    /// Returns `Ok(false)` when nothing changed since the last recorded
    /// state, or when `time` is older than the retained history (counted
    /// as stale); no entry is appended in either case.
    pub fn record(&mut self, state: &K::State, time: f64) -> HistoryResult<bool> {
        check_time(time)?;

        if time < self.base_time {
            self.stats.stale += 1;
            debug!(time, base_time = self.base_time, "Dropped record older than retained history");
            return Ok(false);
        }

        let delta = self.kind.diff(&self.current, state);
        if self.kind.is_empty(&delta) {
            self.stats.elided += 1;
            return Ok(false);
        }

        let next = self.kind.apply(&self.current, &delta);
        debug_assert!(
            self.kind.is_empty(&self.kind.diff(&next, state)),
            "state kind violates the round-trip law at t={time}: {delta:?}"
        );

        self.current = next;
        self.current_time = time;
        let index = self.insert_sorted(Entry::new(time, delta));
        self.stats.recorded += 1;
        trace!(time, index, len = self.entries.len(), "Recorded delta");

        self.prune();
        Ok(true)
    }

    /// Serialize every entry with `time >= since`.
    ///
    /// `None` continues from where the previous `pack` left off. The
    /// incremental cursor then moves to [`head_time`](Self::head_time), so
    /// consecutive calls may repeat the newest timestamp; `unpack` skips
    /// such repeats.
    pub fn pack(&mut self, since: Option<f64>) -> HistoryResult<Bytes> {
        let since = since.unwrap_or(self.last_pack_time);
        let bytes = self.pack_range(since, f64::INFINITY)?;
        self.last_pack_time = self.head_time();
        Ok(bytes)
    }

    /// Serialize entries in `[from, to)` without touching pack bookkeeping.
    pub fn pack_range(&self, from: f64, to: f64) -> HistoryResult<Bytes> {
        let start = self.entries.partition_point(|e| e.time < from);
        wire::encode(self.entries.range(start..).take_while(|e| e.time < to))
    }

    /// Merge a payload produced by [`pack`](Self::pack).
    ///
    /// The payload is validated as a whole before anything is merged.
    /// Entries older than the base are dropped. Runs of entries at a
    /// timestamp the log already holds are matched position by position;
    /// the matching prefix is skipped as a re-delivery and the rest is
    /// appended after the existing run.
    pub fn unpack(&mut self, bytes: &[u8]) -> HistoryResult<UnpackReport> {
        let mut incoming = wire::decode::<K::Delta>(bytes)?;
        incoming.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut report = UnpackReport::default();
        let mut pending = incoming.into_iter().peekable();

        while let Some(first) = pending.next() {
            let time = first.time;
            let mut group = vec![first.delta];
            while let Some(next) = pending.next_if(|e| e.time == time) {
                group.push(next.delta);
            }

            if time < self.base_time {
                report.stale += group.len();
                continue;
            }

            let (accepted, duplicates) = self.merge_run(time, group);
            report.accepted += accepted;
            report.duplicates += duplicates;
        }

        self.stats.unpacked += report.accepted as u64;
        self.stats.duplicates += report.duplicates as u64;
        self.stats.stale += report.stale as u64;

        if report.stale > 0 {
            debug!(
                stale = report.stale,
                base_time = self.base_time,
                "Dropped entries older than retained history"
            );
        }

        self.prune();
        Ok(report)
    }

    /// Open a cursor over this log at `start`.
    ///
    /// Requests older than the retained history start at `base_time`
    /// instead. The cursor returned here is detached: drive it with
    /// [`ReplayCursor::advance_in`]. Use
    /// [`SharedLog::begin_walk`](super::SharedLog::begin_walk) for a cursor
    /// that follows the log on its own.
    pub fn begin_walk(&self, start: f64) -> ReplayCursor<K> {
        ReplayCursor::detached(self, start)
    }

    /// Fold every entry older than `target` into the base and move
    /// `base_time` up to `target`. Returns the number of entries folded.
    ///
    /// Entries folded here are gone for good; cursors that had not reached
    /// them yet will report [`HistoryError::StaleCursor`].
    pub fn advance_base_to(&mut self, target: f64) -> usize {
        if target.is_nan() || target <= self.base_time {
            return 0;
        }

        let mut folded: usize = 0;
        while let Some(entry) = self.entries.pop_front() {
            if entry.time >= target {
                self.entries.push_front(entry);
                break;
            }
            self.base = self.kind.apply(&self.base, &entry.delta);
            self.pruned_through = Some(entry.time);
            folded += 1;
        }
        self.base_time = target;

        if folded > 0 {
            let folded_generation = &mut self.folded_generation;
            self.arrivals.retain(|&(generation, time)| {
                if time < target {
                    *folded_generation = (*folded_generation).max(generation);
                }
                time >= target
            });

            self.stats.pruned += folded as u64;
            debug!(
                folded,
                base_time = self.base_time,
                remaining = self.entries.len(),
                "Folded history into base"
            );
        }
        folded
    }

    /// Newest time this log knows about, recorded or received.
    pub fn head_time(&self) -> f64 {
        match self.entries.back() {
            Some(last) => last.time.max(self.current_time),
            None => self.current_time,
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn base(&self) -> &K::State {
        &self.base
    }

    pub fn base_time(&self) -> f64 {
        self.base_time
    }

    /// Most recently recorded state; the baseline for the next `record`.
    pub fn current(&self) -> &K::State {
        &self.current
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn last_pack_time(&self) -> f64 {
        self.last_pack_time
    }

    pub fn pruned_through(&self) -> Option<f64> {
        self.pruned_through
    }

    pub fn entries(&self) -> &VecDeque<Entry<K::Delta>> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> HistoryStats {
        self.stats
    }

    /// Identity of this log, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of entries ever inserted; moves whenever the log gains one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Earliest time at or before `time` that gained an entry after
    /// `generation`. Entries of that kind already folded away report
    /// `pruned_through`.
    pub(crate) fn inserted_since(&self, generation: u64, time: f64) -> Option<f64> {
        if self.folded_generation > generation {
            return self.pruned_through;
        }
        let from = self.arrivals.partition_point(|&(g, _)| g <= generation);
        self.arrivals
            .range(from..)
            .map(|&(_, t)| t)
            .filter(|&t| t <= time)
            .min_by(f64::total_cmp)
    }

    fn prune(&mut self) {
        let horizon = self.head_time() - self.window;
        self.advance_base_to(horizon);
    }

    /// Insert keeping time order; equal timestamps keep arrival order.
    /// Scans from the tail, so in-order appends are O(1).
    fn insert_sorted(&mut self, entry: Entry<K::Delta>) -> usize {
        let index = self.run_end(entry.time);
        self.note_arrival(entry.time);
        self.entries.insert(index, entry);
        index
    }

    fn note_arrival(&mut self, time: f64) {
        self.generation += 1;
        self.arrivals.push_back((self.generation, time));
    }

    /// Index just past the last entry with `time <= t`.
    fn run_end(&self, t: f64) -> usize {
        let mut index = self.entries.len();
        while index > 0 && self.entries[index - 1].time > t {
            index -= 1;
        }
        index
    }

    fn merge_run(&mut self, time: f64, group: Vec<K::Delta>) -> (usize, usize) {
        let end = self.run_end(time);
        let mut start = end;
        while start > 0 && self.entries[start - 1].time == time {
            start -= 1;
        }

        let shared = (end - start).min(group.len());
        let consistent = (0..shared).all(|i| self.entries[start + i].delta == group[i]);
        let skip = if consistent { shared } else { 0 };

        let mut index = end;
        for delta in group.into_iter().skip(skip) {
            self.note_arrival(time);
            self.entries.insert(index, Entry::new(time, delta));
            index += 1;
        }
        (index - end, skip)
    }
}

pub(crate) fn check_time(time: f64) -> HistoryResult<()> {
    if time.is_finite() {
        Ok(())
    } else {
        Err(HistoryError::InvalidTime(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::kind::testing::Counter;

    fn log(window: f64) -> HistoryLog<Counter> {
        HistoryLog::new(Counter, 0, 0.0, window)
    }

    fn times(log: &HistoryLog<Counter>) -> Vec<f64> {
        log.entries().iter().map(|e| e.time).collect()
    }

    #[test]
    fn record_elides_unchanged_state() {
        let mut log = log(10.0);
        assert!(!log.record(&0, 0.5).unwrap());
        assert!(log.is_empty());
        assert_eq!(log.current_time(), 0.0);

        assert!(log.record(&3, 1.0).unwrap());
        assert!(!log.record(&3, 1.5).unwrap());
        assert_eq!(log.len(), 1);
        assert_eq!(*log.current(), 3);
        assert_eq!(log.stats().elided, 2);
    }

    #[test]
    fn record_keeps_entries_sorted() {
        let mut log = log(10.0);
        log.record(&1, 1.0).unwrap();
        log.record(&2, 3.0).unwrap();
        log.record(&3, 2.0).unwrap();
        log.record(&4, 3.0).unwrap();
        assert_eq!(times(&log), vec![1.0, 2.0, 3.0, 3.0]);
        // Equal timestamps keep arrival order.
        let at_three: Vec<_> = log.entries().iter().skip(2).map(|e| e.delta).collect();
        assert_eq!(at_three, vec![Some(2), Some(4)]);
    }

    #[test]
    fn record_rejects_non_finite_time() {
        let mut log = log(10.0);
        let err = log.record(&1, f64::NAN).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidTime(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn window_folds_old_entries_into_base() {
        let mut log = log(1.0);
        for (i, t) in [0.5, 1.0, 1.5, 2.0, 2.5].into_iter().enumerate() {
            log.record(&(i as i64 + 1), t).unwrap();
        }
        assert_eq!(log.base_time(), 1.5);
        assert_eq!(times(&log), vec![1.5, 2.0, 2.5]);
        assert_eq!(*log.base(), 2);
        assert_eq!(log.pruned_through(), Some(1.0));
        assert_eq!(log.stats().pruned, 2);
        assert!(log
            .entries()
            .iter()
            .all(|e| e.time >= log.current_time() - log.window()));
    }

    #[test]
    fn advance_base_never_moves_backwards() {
        let mut log = log(10.0);
        log.record(&1, 1.0).unwrap();
        assert_eq!(log.advance_base_to(2.0), 1);
        assert_eq!(log.advance_base_to(1.0), 0);
        assert_eq!(log.advance_base_to(f64::NAN), 0);
        assert_eq!(log.base_time(), 2.0);
    }

    #[test]
    fn pack_is_incremental() {
        let mut log = log(10.0);
        log.record(&1, 1.0).unwrap();
        log.record(&2, 2.0).unwrap();

        let first = log.pack(None).unwrap();
        assert_eq!(wire::decode::<Option<i64>>(&first).unwrap().len(), 2);
        assert_eq!(log.last_pack_time(), 2.0);

        log.record(&3, 3.0).unwrap();
        let second: Vec<Entry<Option<i64>>> = wire::decode(&log.pack(None).unwrap()).unwrap();
        let second_times: Vec<f64> = second.iter().map(|e| e.time).collect();
        assert_eq!(second_times, vec![2.0, 3.0]);

        let explicit = wire::decode::<Option<i64>>(&log.pack(Some(0.0)).unwrap()).unwrap();
        assert_eq!(explicit.len(), 3);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn pack_range_is_half_open() {
        let mut log = log(10.0);
        for (v, t) in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            log.record(&v, t).unwrap();
        }
        let mid = wire::decode::<Option<i64>>(&log.pack_range(1.0, 3.0).unwrap()).unwrap();
        assert_eq!(mid.iter().map(|e| e.time).collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert_eq!(log.last_pack_time(), 0.0);
    }

    #[test]
    fn unpack_merges_out_of_order_and_skips_redelivery() {
        let mut sender = log(10.0);
        for (v, t) in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            sender.record(&v, t).unwrap();
        }
        let late = sender.pack_range(2.0, 4.0).unwrap();
        let early = sender.pack_range(0.0, 2.0).unwrap();

        let mut receiver = log(10.0);
        assert_eq!(receiver.unpack(&late).unwrap().accepted, 2);
        assert_eq!(receiver.unpack(&early).unwrap().accepted, 1);
        assert_eq!(times(&receiver), vec![1.0, 2.0, 3.0]);

        let again = receiver.unpack(&sender.pack(Some(0.0)).unwrap()).unwrap();
        assert_eq!(
            again,
            UnpackReport {
                accepted: 0,
                duplicates: 3,
                stale: 0
            }
        );
        assert_eq!(receiver.len(), 3);
    }

    #[test]
    fn unpack_keeps_repeated_deltas_within_one_timestamp() {
        let mut sender = log(10.0);
        sender.record(&1, 1.0).unwrap();
        sender.record(&0, 1.0).unwrap();
        sender.record(&1, 1.0).unwrap();
        let payload = sender.pack(None).unwrap();

        let mut receiver = log(10.0);
        let report = receiver.unpack(&payload).unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(receiver.unpack(&payload).unwrap().duplicates, 3);
        assert_eq!(receiver.len(), 3);
    }

    #[test]
    fn unpack_extends_a_partial_run() {
        let mut sender = log(10.0);
        sender.record(&1, 1.0).unwrap();
        let partial = sender.pack(None).unwrap();
        sender.record(&2, 1.0).unwrap();
        let full = sender.pack(None).unwrap();

        let mut receiver = log(10.0);
        receiver.unpack(&partial).unwrap();
        let report = receiver.unpack(&full).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.duplicates, 1);
        let deltas: Vec<_> = receiver.entries().iter().map(|e| e.delta).collect();
        assert_eq!(deltas, vec![Some(1), Some(2)]);
    }

    #[test]
    fn unpack_drops_entries_older_than_base() {
        let mut receiver = log(1.0);
        receiver.unpack(br#"[{"t":5.0,"d":5}]"#).unwrap();
        assert_eq!(receiver.base_time(), 4.0);

        let report = receiver.unpack(br#"[{"t":2.0,"d":2},{"t":4.5,"d":4}]"#).unwrap();
        assert_eq!(report.stale, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(times(&receiver), vec![4.5, 5.0]);
        assert_eq!(receiver.stats().stale, 1);
    }

    #[test]
    fn malformed_unpack_changes_nothing() {
        let mut receiver = log(10.0);
        receiver.unpack(br#"[{"t":1.0,"d":1}]"#).unwrap();

        let err = receiver
            .unpack(br#"[{"t":2.0,"d":2},{"t":3.0,"d":"three"}]"#)
            .unwrap_err();
        assert!(matches!(err, HistoryError::Malformed(_)));
        assert_eq!(times(&receiver), vec![1.0]);
    }

    #[test]
    fn receive_only_log_is_bounded_by_window() {
        let mut receiver = log(1.0);
        receiver
            .unpack(br#"[{"t":1.0,"d":1},{"t":2.0,"d":2},{"t":3.0,"d":3}]"#)
            .unwrap();
        assert_eq!(receiver.head_time(), 3.0);
        assert_eq!(times(&receiver), vec![2.0, 3.0]);
        assert_eq!(*receiver.base(), 1);
    }

    #[test]
    fn record_older_than_base_is_dropped() {
        let mut log = log(1.0);
        for (v, t) in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            log.record(&v, t).unwrap();
        }
        assert_eq!(log.base_time(), 2.0);

        assert!(!log.record(&9, 0.5).unwrap());
        assert_eq!(times(&log), vec![2.0, 3.0]);
        assert!(log.entries().iter().all(|e| e.time >= log.base_time()));
        assert_eq!(*log.current(), 3);
        assert_eq!(log.stats().stale, 1);
    }

    #[test]
    fn unpack_appends_a_divergent_run_whole() {
        let mut receiver = log(10.0);
        receiver.unpack(br#"[{"t":1.0,"d":1}]"#).unwrap();

        let report = receiver
            .unpack(br#"[{"t":1.0,"d":0},{"t":1.0,"d":1}]"#)
            .unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.duplicates, 0);
        let deltas: Vec<_> = receiver.entries().iter().map(|e| e.delta).collect();
        assert_eq!(deltas, vec![Some(1), Some(0), Some(1)]);
    }

    #[test]
    fn inserts_are_tracked_by_generation() {
        let mut log = log(10.0);
        log.record(&1, 1.0).unwrap();
        log.record(&2, 3.0).unwrap();
        let seen = log.generation();
        assert_eq!(seen, 2);
        assert_eq!(log.inserted_since(seen, 5.0), None);

        // Duplicates and stale entries do not count as inserts.
        log.unpack(br#"[{"t":1.0,"d":1}]"#).unwrap();
        assert_eq!(log.generation(), seen);

        log.unpack(br#"[{"t":2.0,"d":7},{"t":4.0,"d":8}]"#).unwrap();
        assert_eq!(log.generation(), seen + 2);
        assert_eq!(log.inserted_since(seen, 3.5), Some(2.0));
        assert_eq!(log.inserted_since(seen, 1.5), None);
        assert_eq!(log.inserted_since(0, 5.0), Some(1.0));
    }

    #[test]
    fn folded_inserts_are_still_reported() {
        let mut log = log(1.0);
        log.record(&1, 3.0).unwrap();
        let seen = log.generation();

        // Lands inside the window, then gets folded by a newer entry.
        log.unpack(br#"[{"t":2.5,"d":5}]"#).unwrap();
        log.unpack(br#"[{"t":4.0,"d":6}]"#).unwrap();
        assert_eq!(log.pruned_through(), Some(2.5));
        assert_eq!(log.inserted_since(seen, 3.5), Some(2.5));
    }

    #[test]
    fn each_log_has_its_own_id() {
        assert_ne!(log(1.0).id(), log(1.0).id());
    }
}
