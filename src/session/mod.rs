//! Generic duplex session over one transport.
//!
//! A [`Session`] owns a [`Transport`](crate::transport::Transport), keeps
//! it alive with a periodic heartbeat, and splits inbound traffic into an
//! internal-packet stream (protocol control, consumed by specializations
//! such as [`MatchClient`](crate::matchmaking::MatchClient)) and an
//! application-packet stream.

#[allow(clippy::module_inception)]
mod session;

pub use session::{Session, SessionEvent};
