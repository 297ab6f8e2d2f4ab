//! Error types for the arena client.

use thiserror::Error;

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connect was called on an already-connected instance.
    #[error("transport is already connected")]
    AlreadyConnected,

    /// Send was attempted on a transport that is not open.
    #[error("transport is not connected")]
    NotConnected,

    /// The remote address could not be resolved.
    #[error("invalid remote address: {0}")]
    InvalidAddress(String),

    /// All handshake attempts were exhausted without an acknowledgement.
    #[error("exceeded the maximum of {attempts} connection attempts")]
    AttemptsExhausted {
        /// Number of attempts that were made.
        attempts: u32,
    },

    /// I/O error from the underlying socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error when a packet cannot be serialized into its wire envelope.
///
/// Decoding has no error type: it is fail-soft and yields the sentinel
/// empty packet instead (see [`crate::wire::codec::decode`]).
#[derive(Debug, Error)]
#[error("packet could not be serialized: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Errors raised by the session core.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `run` was called more than once on the same session.
    #[error("session was already started")]
    AlreadyStarted,

    /// A second identification packet arrived after the identity was set.
    #[error("session identity is already assigned")]
    IdentityAlreadySet,

    /// The identification packet carried no usable id.
    #[error("identification packet is missing an id")]
    MissingIdentity,

    /// Transport-level failure reported through the session event stream.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Caller-misuse errors raised by the matchmaking state machine.
///
/// These are synchronous hard failures; connectivity problems are reported
/// through the event stream instead.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Joining the queue while already queued.
    #[error("already searching for a match")]
    AlreadyQueued,

    /// Joining the queue while a match is running.
    #[error("already in a match")]
    AlreadyInMatch,

    /// Leaving the queue while not queued.
    #[error("not searching for a match")]
    NotQueued,

    /// Confirming without an open confirmation window.
    #[error("no match confirmation window is open")]
    NoConfirmationOpen,

    /// Confirming twice within one confirmation window.
    #[error("match request was already confirmed")]
    AlreadyConfirmed,

    /// A match-scoped operation was attempted outside of a match.
    #[error("not in a match")]
    NotInMatch,

    /// A match-channel send was attempted with no live channel.
    #[error("no match channel is available")]
    ChannelUnavailable,

    /// Session-level failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
