//! Wire codec for packed history
//!
//! A payload is a JSON array of `{"t": <seconds>, "d": <delta>}` records in
//! non-decreasing time order. There is no version tag; both ends must agree
//! on the state kind out of band.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{HistoryError, HistoryResult};
use super::log::Entry;

/// Encode entries into a payload.
pub fn encode<'a, D, I>(entries: I) -> HistoryResult<Bytes>
where
    D: Serialize + 'a,
    I: IntoIterator<Item = &'a Entry<D>>,
{
    let records: Vec<&Entry<D>> = entries.into_iter().collect();
    serde_json::to_vec(&records)
        .map(Bytes::from)
        .map_err(|e| HistoryError::Encode(e.to_string()))
}

/// Decode a payload. Either every entry is returned or the whole payload is
/// rejected. JSON has no NaN or infinity, so decoded times are finite.
pub fn decode<D: DeserializeOwned>(bytes: &[u8]) -> HistoryResult<Vec<Entry<D>>> {
    Ok(serde_json::from_slice(bytes)?)
}
