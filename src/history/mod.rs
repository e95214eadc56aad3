//! Temporal record/replay engine
//!
//! - [`HistoryLog`] records states as timestamped deltas, keeps a bounded
//!   window, and packs/unpacks history for the network.
//! - [`ReplayCursor`] walks a log forward and materializes state at any
//!   later time.
//! - [`StateKind`] plugs a concrete state type into both.

pub mod cursor;
pub mod error;
pub mod kind;
pub mod log;
pub mod wire;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard};

pub use cursor::ReplayCursor;
pub use error::{HistoryError, HistoryResult};
pub use kind::StateKind;
pub use log::{Entry, HistoryLog, HistoryStats, UnpackReport};

/// Owner handle for a log that cursors follow.
///
/// The holder of this handle is the only writer. Cursors opened through
/// [`begin_walk`](Self::begin_walk) keep a weak, read-only reference and
/// observe new entries as they arrive.
pub struct SharedLog<K: StateKind> {
    inner: Arc<RwLock<HistoryLog<K>>>,
}

impl<K: StateKind> SharedLog<K> {
    pub fn new(log: HistoryLog<K>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(log)),
        }
    }

    pub fn record(&self, state: &K::State, time: f64) -> HistoryResult<bool> {
        self.inner.write().record(state, time)
    }

    pub fn pack(&self, since: Option<f64>) -> HistoryResult<Bytes> {
        self.inner.write().pack(since)
    }

    pub fn pack_range(&self, from: f64, to: f64) -> HistoryResult<Bytes> {
        self.inner.read().pack_range(from, to)
    }

    pub fn unpack(&self, bytes: &[u8]) -> HistoryResult<UnpackReport> {
        self.inner.write().unpack(bytes)
    }

    pub fn advance_base_to(&self, target: f64) -> usize {
        self.inner.write().advance_base_to(target)
    }

    /// Open a cursor that follows this log.
    pub fn begin_walk(&self, start: f64) -> ReplayCursor<K> {
        let log = self.inner.read();
        ReplayCursor::attached(Arc::downgrade(&self.inner), &log, start)
    }

    /// Read access for inspection. Do not hold the guard across an advance
    /// of a cursor on the same log.
    pub fn read(&self) -> RwLockReadGuard<'_, HistoryLog<K>> {
        self.inner.read()
    }

    pub fn head_time(&self) -> f64 {
        self.inner.read().head_time()
    }

    pub fn stats(&self) -> HistoryStats {
        self.inner.read().stats()
    }
}
