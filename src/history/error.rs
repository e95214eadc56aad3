//! History engine errors

use thiserror::Error;

/// Errors surfaced by [`HistoryLog`](super::HistoryLog) and
/// [`ReplayCursor`](super::ReplayCursor).
///
/// None of these leave the log in a partially updated state.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A cursor was asked to move backwards. The cursor is untouched; open a
    /// new one to look at earlier history.
    #[error("cursor cannot rewind from {cursor_time} to {requested}")]
    Rewind { cursor_time: f64, requested: f64 },

    /// The log folded entries the cursor had not consumed yet.
    #[error("cursor at {cursor_time} fell behind the retained window (pruned through {pruned_through})")]
    StaleCursor { cursor_time: f64, pruned_through: f64 },

    /// An entry arrived at or before the cursor's time after the cursor had
    /// already passed it.
    #[error("entry at {entry_time} arrived behind cursor at {cursor_time}")]
    LateEntry { cursor_time: f64, entry_time: f64 },

    /// A detached cursor was driven over a log it was not opened on.
    #[error("cursor was opened on a different history log")]
    ForeignLog,

    /// The log a cursor was walking has been dropped.
    #[error("history log is no longer available")]
    LogClosed,

    /// Timestamps must be finite.
    #[error("invalid timestamp: {0}")]
    InvalidTime(f64),

    /// A packed payload did not decode into an entry sequence.
    #[error("malformed history payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to encode history payload: {0}")]
    Encode(String),
}

impl HistoryError {
    /// True when the cursor must be abandoned and reopened.
    pub fn needs_new_cursor(&self) -> bool {
        matches!(
            self,
            HistoryError::Rewind { .. }
                | HistoryError::StaleCursor { .. }
                | HistoryError::LateEntry { .. }
        )
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;
