//! The unreliable per-match datagram channel.
//!
//! Because the transport is connectionless, "connected" is a purely
//! client-observed state: a bounded-retry handshake establishes it
//! optimistically and a heartbeat staleness check is the only mechanism
//! that detects silent failure.

mod channel;

pub use channel::{ChannelState, ChannelTuning, DatagramChannel};
