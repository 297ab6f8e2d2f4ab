//! Packet envelope codec.
//!
//! Encoding is fail-hard: a packet whose content cannot be represented
//! returns an [`EncodeError`]. Decoding is fail-soft: any structural or
//! type error is logged and replaced with the sentinel empty packet, so a
//! single malformed inbound message can never terminate a receive loop.

use crate::core::EncodeError;

use super::Packet;

/// Serialize a packet into its JSON wire envelope.
pub fn encode(packet: &Packet) -> Result<String, EncodeError> {
    serde_json::to_string(packet).map_err(EncodeError::from)
}

/// Parse a wire envelope into a packet.
///
/// On any parse failure this logs once and yields [`Packet::empty`]
/// instead of an error.
pub fn decode(data: &str) -> Packet {
    match serde_json::from_str(data) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(%err, data, "packet deserialisation failed");
            Packet::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn test_round_trip() {
        let mut content = Map::new();
        content.insert("matchId".to_string(), json!("m1"));
        content.insert("count".to_string(), json!(3));
        let packet = Packet::internal("RGS:CONFIRM", content);

        let wire = encode(&packet).unwrap();
        assert_eq!(decode(&wire), packet);
    }

    #[test]
    fn test_round_trip_empty_content() {
        let packet = Packet::new("app", "HELLO", Map::new());
        let wire = encode(&packet).unwrap();
        let decoded = decode(&wire);
        assert_eq!(decoded, packet);
        assert!(decoded.content().is_empty());
    }

    #[test]
    fn test_wire_field_names_are_lowercase() {
        let wire = encode(&Packet::internal_empty("GS:PING")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], "internal");
        assert_eq!(value["header"], "GS:PING");
        assert!(value["content"].is_object());
    }

    #[test]
    fn test_decode_missing_content_defaults_to_empty() {
        let packet = decode(r#"{"type":"internal","header":"GS:PING"}"#);
        assert_eq!(packet.header(), "GS:PING");
        assert!(packet.content().is_empty());
    }

    #[test]
    fn test_decode_malformed_yields_sentinel() {
        for data in [
            "",
            "not json",
            "42",
            "[1,2,3]",
            r#"{"type":7,"header":"x","content":{}}"#,
            r#"{"header":"x"}"#,
        ] {
            let packet = decode(data);
            assert!(packet.is_empty(), "expected sentinel for {data:?}");
        }
    }
}
