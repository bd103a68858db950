//! Common types for the environment abstraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Content type attached to every JSON lifecycle event.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Identifier assigned by the bus to a published message.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random MessageId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic MessageId from a sequence number (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Envelope for messages moving across the bus.
///
/// The payload is opaque bytes; the ingestion side decides how to decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// The raw payload bytes
    pub payload: Vec<u8>,

    /// MIME type of the payload
    pub content_type: String,

    /// Free-form message attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl BusMessage {
    /// Creates a new message from payload bytes.
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            payload,
            content_type: content_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Creates a JSON message.
    pub fn json(payload: Vec<u8>) -> Self {
        Self::new(payload, JSON_CONTENT_TYPE)
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_from_seed_is_stable() {
        assert_eq!(MessageId::from_seed(7), MessageId::from_seed(7));
        assert_ne!(MessageId::from_seed(7), MessageId::from_seed(8));
    }

    #[test]
    fn test_json_message() {
        let msg = BusMessage::json(b"{}".to_vec()).with_attribute("ref", "abc");
        assert_eq!(msg.content_type, JSON_CONTENT_TYPE);
        assert_eq!(msg.size(), 2);
        assert_eq!(msg.attributes.get("ref").map(String::as_str), Some("abc"));
    }
}
