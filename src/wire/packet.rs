//! The packet envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved packet type for protocol-level control traffic.
pub const INTERNAL: &str = "internal";

/// An immutable `{type, header, content}` triple.
///
/// `type` is either [`INTERNAL`] or an application-defined tag, `header`
/// names the message within its type, and `content` is a JSON object.
/// Absent content is the empty object, never null. None of the fields can
/// be reassigned after construction; changing a packet means building a
/// new one.
///
/// The wire form uses lowercase field names and is structurally isomorphic
/// to this struct, so an encode/decode round trip reproduces an equal
/// packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    kind: String,
    header: String,
    #[serde(default)]
    content: Map<String, Value>,
}

impl Packet {
    /// Create a packet with the given type, header, and content.
    pub fn new(
        kind: impl Into<String>,
        header: impl Into<String>,
        content: Map<String, Value>,
    ) -> Self {
        Self {
            kind: kind.into(),
            header: header.into(),
            content,
        }
    }

    /// Create an internal (protocol-level) packet.
    pub fn internal(header: impl Into<String>, content: Map<String, Value>) -> Self {
        Self::new(INTERNAL, header, content)
    }

    /// Create an internal packet with empty content.
    pub fn internal_empty(header: impl Into<String>) -> Self {
        Self::internal(header, Map::new())
    }

    /// The sentinel produced when decoding fails: empty type, empty header,
    /// empty content.
    pub fn empty() -> Self {
        Self {
            kind: String::new(),
            header: String::new(),
            content: Map::new(),
        }
    }

    /// Whether this is the decode-failure sentinel.
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.header.is_empty() && self.content.is_empty()
    }

    /// The packet type tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The message header within the type.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// The structured content.
    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    /// Whether this is protocol control traffic.
    pub fn is_internal(&self) -> bool {
        self.kind == INTERNAL
    }

    /// Read a string value out of the content, if present.
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Read an integer value out of the content, if present.
    ///
    /// Tolerates numbers that arrive as JSON strings, which some peers
    /// produce for 64-bit values.
    pub fn content_i64(&self, key: &str) -> Option<i64> {
        match self.content.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet {{ type: {:?}, header: {:?}, content keys: {} }}",
            self.kind,
            self.header,
            self.content.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_internal_packet() {
        let packet = Packet::internal_empty("GS:PING");
        assert!(packet.is_internal());
        assert_eq!(packet.header(), "GS:PING");
        assert!(packet.content().is_empty());
    }

    #[test]
    fn test_empty_sentinel() {
        let packet = Packet::empty();
        assert!(packet.is_empty());
        assert!(!packet.is_internal());
    }

    #[test]
    fn test_content_accessors() {
        let mut content = Map::new();
        content.insert("id".to_string(), json!("abc"));
        content.insert("stamp".to_string(), json!(1500));
        content.insert("stringy".to_string(), json!("2500"));

        let packet = Packet::new("app", "HELLO", content);
        assert_eq!(packet.content_str("id"), Some("abc"));
        assert_eq!(packet.content_i64("stamp"), Some(1500));
        assert_eq!(packet.content_i64("stringy"), Some(2500));
        assert_eq!(packet.content_i64("missing"), None);
        assert_eq!(packet.content_str("stamp"), None);
    }
}
