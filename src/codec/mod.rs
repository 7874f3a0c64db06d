//! Codec module - payload serialization for negotiated media types.
//!
//! This module converts between [`serde_json::Value`] (the in-memory shape
//! of property values, action inputs/outputs, and event data) and byte
//! payloads for a given media type:
//!
//! - [`JsonCodec`] - `application/json` via `serde_json`
//! - [`MsgPackCodec`] - `application/msgpack` via `rmp-serde` (map format)
//!
//! The [`CodecRegistry`] is the negotiation surface the router and the
//! observation manager talk to: it answers which media types are supported,
//! picks the default when a request carries none, and routes
//! structured-suffix types (`application/td+json`) to the JSON codec.
//!
//! # Example
//!
//! ```
//! use thingwire::codec::CodecRegistry;
//! use serde_json::json;
//!
//! let codecs = CodecRegistry::new();
//! let content = codecs
//!     .value_to_content(&json!({"on": true}), "application/json")
//!     .unwrap();
//! let value = codecs
//!     .content_to_value(&content.body, "application/json")
//!     .unwrap();
//! assert_eq!(value, json!({"on": true}));
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Result, ThingwireError};

/// Media type for JSON payloads.
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// Media type for MessagePack payloads.
pub const MEDIA_TYPE_MSGPACK: &str = "application/msgpack";

/// Media type for thing description documents.
pub const MEDIA_TYPE_TD: &str = "application/td+json";

/// A serialized payload together with the media type it was serialized in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Negotiated media type of `body`.
    pub media_type: String,
    /// Serialized payload bytes.
    pub body: Bytes,
}

impl Content {
    /// Create a new content value.
    pub fn new(media_type: impl Into<String>, body: Bytes) -> Self {
        Self {
            media_type: media_type.into(),
            body,
        }
    }
}

/// A codec for one media type.
///
/// Implementations are stateless marker structs; the registry owns them as
/// trait objects so the supported set can be extended by callers.
pub trait PayloadCodec: Send + Sync {
    /// The media type this codec serializes.
    fn media_type(&self) -> &'static str;

    /// Serialize a value to bytes.
    fn encode_value(&self, value: &Value) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value.
    fn decode_value(&self, bytes: &[u8]) -> Result<Value>;
}

/// Registry of payload codecs keyed by media type.
///
/// The first registered codec's media type is the default, applied when a
/// request carries a payload but no content-format option.
pub struct CodecRegistry {
    codecs: Vec<Box<dyn PayloadCodec>>,
}

impl CodecRegistry {
    /// Create a registry with the built-in codecs (JSON first, so
    /// `application/json` is the default media type).
    pub fn new() -> Self {
        Self {
            codecs: vec![Box::new(JsonCodec), Box::new(MsgPackCodec)],
        }
    }

    /// Create an empty registry.
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Register an additional codec. The default media type stays the
    /// first registered one.
    pub fn register(&mut self, codec: Box<dyn PayloadCodec>) {
        self.codecs.push(codec);
    }

    /// The media type applied when a request has a payload but no
    /// content-format option.
    pub fn default_media_type(&self) -> &str {
        self.codecs
            .first()
            .map(|c| c.media_type())
            .unwrap_or(MEDIA_TYPE_JSON)
    }

    /// All media types this registry can serialize, in registration order.
    pub fn offered(&self) -> Vec<&'static str> {
        self.codecs.iter().map(|c| c.media_type()).collect()
    }

    /// Whether a request payload in `media_type` can be deserialized.
    pub fn is_supported(&self, media_type: &str) -> bool {
        self.lookup(media_type).is_some()
    }

    /// Serialize a value in the given media type.
    pub fn value_to_content(&self, value: &Value, media_type: &str) -> Result<Content> {
        let codec = self
            .lookup(media_type)
            .ok_or_else(|| ThingwireError::UnsupportedMediaType(media_type.to_string()))?;
        let body = codec.encode_value(value)?;
        Ok(Content::new(media_type, Bytes::from(body)))
    }

    /// Deserialize bytes in the given media type.
    pub fn content_to_value(&self, body: &[u8], media_type: &str) -> Result<Value> {
        let codec = self
            .lookup(media_type)
            .ok_or_else(|| ThingwireError::UnsupportedMediaType(media_type.to_string()))?;
        codec.decode_value(body)
    }

    /// Find the codec for a media type.
    ///
    /// Exact match first; structured-suffix types (`application/td+json`)
    /// fall back to the codec for the suffix's base type.
    fn lookup(&self, media_type: &str) -> Option<&dyn PayloadCodec> {
        if let Some(codec) = self
            .codecs
            .iter()
            .find(|c| c.media_type() == media_type)
            .map(|c| c.as_ref())
        {
            return Some(codec);
        }

        if media_type.ends_with("+json") {
            return self
                .codecs
                .iter()
                .find(|c| c.media_type() == MEDIA_TYPE_JSON)
                .map(|c| c.as_ref());
        }

        None
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
