//! JSON codec using `serde_json`.
//!
//! JSON is the default media type: requests that carry a payload without a
//! content-format option are decoded as JSON, and one-shot reads with no
//! negotiated type are serialized as JSON. Thing description documents
//! (`application/td+json`) also serialize through this codec.

use serde_json::Value;

use crate::error::Result;

use super::{PayloadCodec, MEDIA_TYPE_JSON};

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode(value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid JSON.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl PayloadCodec for JsonCodec {
    fn media_type(&self) -> &'static str {
        MEDIA_TYPE_JSON
    }

    fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        Self::encode(value)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Value> {
        Self::decode(bytes)
    }
}
