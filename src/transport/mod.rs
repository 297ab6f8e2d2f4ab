//! The transport capability consumed by the session core.
//!
//! A transport is a constructed, not-yet-connected object that moves whole
//! text messages to and from one remote endpoint. Delivery guarantees are
//! a property of the concrete implementation, not of this contract: the
//! in-crate [`DatagramChannel`](crate::datagram::DatagramChannel) is
//! unreliable and unordered, while a web-socket style adapter would be
//! reliable and ordered.
//!
//! The original design exposed four multicast callbacks (connect, close,
//! message, error); here they are one typed event stream so a consumer
//! observes each occurrence at most once, in arrival order.

use tokio::sync::mpsc;

use crate::core::{ConnectionConfig, TransportError};

/// Something observable happened on a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport finished connecting.
    Connected,
    /// The transport closed and will emit no further messages.
    Closed,
    /// A whole inbound message.
    Message(String),
    /// A failure on a background path; the transport may still be usable.
    Error(TransportError),
}

/// Contract every connection implementation satisfies.
///
/// All methods take `&self`; implementations use interior mutability so a
/// transport can be shared across the owning session's background loops.
pub trait Transport: Send + Sync + 'static {
    /// Begin connecting to the configured endpoint.
    ///
    /// Returns immediately; progress is reported through the event stream.
    /// Calling this twice on one instance fails with
    /// [`TransportError::AlreadyConnected`].
    fn connect(&self, config: &ConnectionConfig) -> Result<(), TransportError>;

    /// Send one whole message.
    fn send(&self, data: &str) -> Result<(), TransportError>;

    /// Close the transport and stop its background work.
    ///
    /// Closing an unconnected or already-closed instance is a no-op.
    fn close(&self);

    /// Take the event stream.
    ///
    /// Yields `Some` exactly once; there is a single consumer per
    /// transport instance.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;
}
