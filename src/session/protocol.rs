//! Outbound wire protocol for the engine stream.
//!
//! The stream carries exactly two things: one JSON config message right
//! after connect, then raw PCM as binary frames. Binary frames need no
//! encoding step; only the config handshake lives here.

use serde::Serialize;

// ---------------------------------------------------------------------------
// ClientMessage
// ---------------------------------------------------------------------------

/// Messages this client sends as text frames.
///
/// Serialises with an internal `type` tag, e.g.
/// `{"type":"config","api_key":"…"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Configuration handshake, sent exactly once per successful
    /// connection, before any audio frame.
    Config { api_key: String },
}

impl ClientMessage {
    pub fn config(api_key: impl Into<String>) -> Self {
        ClientMessage::Config {
            api_key: api_key.into(),
        }
    }

    /// JSON encoding for the text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_encodes_with_type_tag_and_api_key() {
        let encoded = ClientMessage::config("k-123").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["type"], "config");
        assert_eq!(value["api_key"], "k-123");
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn config_encodes_empty_key() {
        let encoded = ClientMessage::config("").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["api_key"], "");
    }
}
