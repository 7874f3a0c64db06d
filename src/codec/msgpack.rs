//! MsgPack codec using `rmp-serde`.
//!
//! Uses `to_vec_named` so maps are serialized with field names rather than
//! positionally. Peers that decode MessagePack generically (without a
//! schema) expect the map format, and `serde_json::Value` maps only
//! roundtrip through it.

use serde_json::Value;

use crate::error::Result;

use super::{PayloadCodec, MEDIA_TYPE_MSGPACK};

/// MessagePack codec for structured data.
///
/// Produces the map format (`to_vec_named`), not the positional array
/// format.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode(value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid MessagePack.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl PayloadCodec for MsgPackCodec {
    fn media_type(&self) -> &'static str {
        MEDIA_TYPE_MSGPACK
    }

    fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        Self::encode(value)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Value> {
        Self::decode(bytes)
    }
}
