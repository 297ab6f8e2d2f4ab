//! Reserved wire headers.
//!
//! These exact strings are fixed by the server protocol. A packet whose
//! type is [`INTERNAL`](crate::wire::INTERNAL) and whose header is one of
//! these is protocol control traffic, never application payload.

/// Session heartbeat ping; the peer replies with the same header.
pub const SESSION_PING: &str = "GS:PING";

/// One-time identification push from the server, content `{"id": ...}`.
pub const SESSION_ID: &str = "GS:ID";

/// Datagram handshake; used for both the connect request and its ack.
pub const DATAGRAM_CONN: &str = "UDP:CONN";

/// Datagram heartbeat ping, content `{"stamp": <unix millis>}`, echoed back.
pub const DATAGRAM_PING: &str = "UDP:PING";

/// Prefix shared by all matchmaking headers.
pub const MATCH_PREFIX: &str = "RGS:";

/// Broadcast a payload to the current match group.
pub const MATCH_BROADCAST: &str = "RGS:BROADCAST";

/// Join the matchmaking queue.
pub const MATCH_SEARCH: &str = "RGS:SEARCH";

/// Leave the matchmaking queue.
pub const MATCH_LEAVE: &str = "RGS:LEAVE";

/// Match proposal from the server, and the client's confirmation.
pub const MATCH_CONFIRM: &str = "RGS:CONFIRM";

/// A proposed match fell apart before starting.
pub const MATCH_DISBAND: &str = "RGS:DISBAND";

/// The confirmed match begins.
pub const MATCH_START: &str = "RGS:START";

/// The running match finished normally.
pub const MATCH_END: &str = "RGS:END";

/// A participant left the running match.
pub const MATCH_EXIT: &str = "RGS:EXIT";

/// Per-participant state fan-out while in a match.
pub const MATCH_STATE_UPDATE: &str = "RGS:STATE";

/// Opaque message delivery, or a match-channel grant carrying
/// `{"identifier", "groupId"}`.
pub const MATCH_MESSAGE_UPDATE: &str = "RGS:MESSAGE";

/// World-level update for the running match.
pub const MATCH_WORLD_UPDATE: &str = "RGS:WORLD";
