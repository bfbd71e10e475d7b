use crate::core::errors::HubError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Terminator appended to every record and used to split inbound chunks
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Text codec for separator-terminated JSON records
///
/// Outbound records are serialized and terminated with [`RECORD_SEPARATOR`].
/// Inbound chunks may carry any number of concatenated records; each one is
/// decoded on its own so a malformed record does not poison its neighbours.
#[derive(Debug)]
pub struct HubCodec<M> {
    _message: PhantomData<fn() -> M>,
}

impl<M> HubCodec<M> {
    pub const fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for HubCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for HubCodec<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M: DeserializeOwned> HubCodec<M> {
    /// Serialize one record and append the terminator
    pub fn encode<T: Serialize + ?Sized>(&self, record: &T) -> Result<String, HubError> {
        let mut text =
            serde_json::to_string(record).map_err(|e| HubError::Encode(e.to_string()))?;
        text.push(RECORD_SEPARATOR);
        Ok(text)
    }

    /// Split a chunk into records and decode each independently
    ///
    /// Results keep the order the records had inside the chunk.
    pub fn decode(&self, chunk: &str) -> Vec<Result<M, HubError>> {
        let mut records: Vec<&str> = chunk.split(RECORD_SEPARATOR).collect();
        if records.last().is_some_and(|tail| tail.is_empty()) {
            records.pop();
        }

        records
            .into_iter()
            .map(|record| {
                serde_json::from_str::<M>(record)
                    .map_err(|e| HubError::Decode(format!("{} in record {:?}", e, record)))
            })
            .collect()
    }
}
