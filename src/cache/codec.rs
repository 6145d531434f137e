//! Value Codecs
//!
//! L1 stores typed values; L2 stores bytes. A [`ValueCodec`] converts between
//! the two at the L2 boundary.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Converts values to and from the L2 byte payload
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Bytes>;
    fn decode(&self, bytes: &[u8]) -> Result<V>;
}

/// JSON codec for any serde type
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for JsonCodec<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<V> ValueCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| Error::Codec(format!("JSON encode failed: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("JSON decode failed: {}", e)))
    }
}

/// Passthrough codec for raw byte values
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl ValueCodec<Bytes> for RawCodec {
    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}
