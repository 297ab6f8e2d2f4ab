//! Matchmaking over a session: queue membership, match confirmation, the
//! match lifecycle, and the per-match datagram channel.
//!
//! A [`MatchClient`] composes a [`Session`](crate::session::Session) and
//! consumes its internal-packet stream. State transitions happen only on
//! server acknowledgements; the public commands validate locally and then
//! put a request on the wire.

mod client;
mod state;
mod update;

pub use client::MatchClient;
pub use state::{ChannelIdentity, MatchEvent, MatchState};
pub use update::{ParticipantState, StateUpdate, Vec3};
