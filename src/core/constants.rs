//! Protocol timing constants.
//!
//! These values are fixed by the server protocol and MUST NOT be changed.
//! The datagram values double as the defaults for
//! [`ChannelTuning`](crate::datagram::ChannelTuning).

use std::time::Duration;

// =============================================================================
// SESSION TIMING
// =============================================================================

/// Delay before the first connect attempt, tolerant of transport warm-up.
pub const CONNECT_WARMUP_DELAY: Duration = Duration::from_millis(15);

/// Interval between session heartbeat pings.
pub const SESSION_PING_INTERVAL: Duration = Duration::from_millis(15_500);

// =============================================================================
// DATAGRAM CHANNEL TIMING
// =============================================================================

/// Interval between handshake connect attempts.
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(1200);

/// Maximum handshake attempts before the channel reports connection failure.
pub const MAX_HANDSHAKE_ATTEMPTS: u32 = 5;

/// Interval between datagram heartbeat pings.
pub const DATAGRAM_PING_INTERVAL: Duration = Duration::from_millis(1000);

/// Consider the channel dead after this long without an acknowledgement.
pub const ACK_STALENESS_THRESHOLD: Duration = Duration::from_millis(3500);

// =============================================================================
// CHANNELS
// =============================================================================

/// Buffer size for event and packet streams.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
