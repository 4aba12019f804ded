//! Core types for objectloader

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Type tag of objects whose real content is binary
///
/// Such objects cannot travel inline in the line-oriented batch protocol and
/// are only ever resolved through the single-object path.
pub const RAW_ENCODING_MARKER: &str = "Objects.Other.RawEncoding";

/// Content-hash identifier of an object
///
/// Identical content always yields the identical id, so ids double as
/// de-duplication keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    /// Create a new ObjectId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved object: its id and decoded payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Id the object was requested under
    pub id: ObjectId,
    /// Decoded JSON record; `payload["id"]` equals `id`
    pub payload: serde_json::Value,
    /// Bytes of JSON the payload was decoded from (0 for single-object fetches)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl Item {
    /// Parse a JSON payload delivered under `id`
    ///
    /// # Errors
    ///
    /// Fails with a [`ProtocolError`] when the text is not JSON or is not an
    /// object whose `id` field equals `id`.
    pub fn from_json(id: impl Into<ObjectId>, json: &str) -> Result<Self> {
        let id = id.into();
        let payload: serde_json::Value =
            serde_json::from_str(json).map_err(|source| ProtocolError::InvalidJson {
                id: id.0.clone(),
                source,
            })?;
        if !is_base(&payload, id.as_str()) {
            return Err(ProtocolError::NotABase { id: id.0 }.into());
        }
        Ok(Self {
            id,
            payload,
            size: Some(json.len()),
        })
    }

    /// The payload's `speckle_type`, if present
    pub fn speckle_type(&self) -> Option<&str> {
        self.payload.get("speckle_type").and_then(|t| t.as_str())
    }
}

/// Whether `value` is an object record carrying `id` as its own id
pub fn is_base(value: &serde_json::Value, id: &str) -> bool {
    value
        .as_object()
        .and_then(|map| map.get("id"))
        .and_then(|v| v.as_str())
        .is_some_and(|own| own == id)
}

/// Whether raw JSON bytes mention the raw-encoding marker anywhere
///
/// Works on bytes so a batch line can be rejected before it is decoded.
pub fn contains_raw_encoding(json: &[u8]) -> bool {
    let marker = RAW_ENCODING_MARKER.as_bytes();
    json.windows(marker.len()).any(|w| w == marker)
}
