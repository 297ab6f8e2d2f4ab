//! # Arena Client
//!
//! A client-side runtime for real-time multiplayer session services:
//! a JSON packet envelope, a pluggable transport capability, a heartbeat
//! session core, an unreliable UDP datagram channel with its own
//! connection-establishment protocol, and a matchmaking state machine
//! that drives the queue, confirmation, and match lifecycle.
//!
//! ## Modules
//!
//! - [`core`]: Configuration, protocol constants, and error types
//! - [`wire`]: The `{type, header, content}` packet envelope and codec
//! - [`transport`]: The transport contract and its typed event stream
//! - [`session`]: Generic duplex session with heartbeat and dispatch
//! - [`datagram`]: UDP channel with handshake and staleness detection
//! - [`matchmaking`]: Queue, confirm, and match lifecycle over a session
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use arena_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MatchError> {
//!     let session_endpoint = ConnectionConfig::new("play.example.net", 7350);
//!     let channel_endpoint = ConnectionConfig::new("play.example.net", 7351);
//!
//!     // Any Transport works here; the in-crate datagram channel is one.
//!     let transport = DatagramChannel::new();
//!     let mut client = MatchClient::new(transport, session_endpoint, channel_endpoint);
//!     let mut events = client.take_events().expect("events taken once");
//!     client.run()?;
//!
//!     client.join_queue()?;
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             MatchEvent::ConfirmRequested { .. } => client.confirm_match()?,
//!             MatchEvent::MatchStarted { match_id } => {
//!                 println!("match {match_id} started");
//!             }
//!             MatchEvent::MatchEnded { .. } => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod datagram;
pub mod matchmaking;
pub mod session;
pub mod transport;
pub mod wire;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        ConnectionConfig, EncodeError, MatchError, SessionError, TransportError,
    };
    pub use crate::datagram::{ChannelState, ChannelTuning, DatagramChannel};
    pub use crate::matchmaking::{
        ChannelIdentity, MatchClient, MatchEvent, MatchState, ParticipantState, StateUpdate, Vec3,
    };
    pub use crate::session::{Session, SessionEvent};
    pub use crate::transport::{Transport, TransportEvent};
    pub use crate::wire::{INTERNAL, Packet};
}

// Re-export commonly used items at crate root
pub use crate::core::{ConnectionConfig, MatchError, SessionError, TransportError};
pub use crate::matchmaking::{MatchClient, MatchEvent};
pub use crate::session::{Session, SessionEvent};
pub use crate::transport::{Transport, TransportEvent};
pub use crate::wire::Packet;
