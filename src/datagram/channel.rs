//! Datagram channel: connection establishment and liveness over UDP.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::core::constants::{
    ACK_STALENESS_THRESHOLD, DATAGRAM_PING_INTERVAL, EVENT_CHANNEL_CAPACITY,
    HANDSHAKE_RETRY_INTERVAL, MAX_HANDSHAKE_ATTEMPTS,
};
use crate::core::{ConnectionConfig, TransportError};
use crate::transport::{Transport, TransportEvent};
use crate::wire::{Packet, codec, headers};

/// Connection-lifecycle state of a [`DatagramChannel`].
///
/// `Closed` is terminal: a new instance is required to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed, not yet connecting.
    Idle,
    /// Socket bound, connect requests being retried.
    Handshaking,
    /// Handshake acknowledged, heartbeat running.
    Connected,
    /// Torn down, by the caller or by staleness detection.
    Closed,
}

/// Timing knobs for the channel protocol.
///
/// The defaults are the protocol values; tests shrink them to run the
/// liveness machinery at millisecond scale.
#[derive(Debug, Clone)]
pub struct ChannelTuning {
    /// Interval between handshake connect attempts.
    pub handshake_retry_interval: Duration,
    /// Maximum handshake attempts before reporting connection failure.
    pub max_handshake_attempts: u32,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Time without an acknowledgement after which the channel is dead.
    pub staleness_threshold: Duration,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            handshake_retry_interval: HANDSHAKE_RETRY_INTERVAL,
            max_handshake_attempts: MAX_HANDSHAKE_ATTEMPTS,
            heartbeat_interval: DATAGRAM_PING_INTERVAL,
            staleness_threshold: ACK_STALENESS_THRESHOLD,
        }
    }
}

/// Milliseconds since the unix epoch, as carried in heartbeat stamps.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Liveness clock: last acknowledgement time plus the derived RTT sample.
///
/// Written only by the receive path, read by the heartbeat loop and any
/// caller thread.
#[derive(Debug)]
struct AckClock {
    last_ack: Mutex<Instant>,
    rtt_ms: AtomicU64,
}

impl AckClock {
    fn new() -> Self {
        Self {
            last_ack: Mutex::new(Instant::now()),
            rtt_ms: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        let mut guard = self.last_ack.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Instant::now();
    }

    fn refresh(&self, echoed_stamp: i64) {
        self.reset();
        let rtt = (unix_millis() - echoed_stamp).max(0) as u64;
        self.rtt_ms.store(rtt, Ordering::Relaxed);
    }

    fn since_last_ack(&self) -> Duration {
        let guard = self.last_ack.lock().unwrap_or_else(|e| e.into_inner());
        guard.elapsed()
    }

    fn rtt(&self) -> Duration {
        Duration::from_millis(self.rtt_ms.load(Ordering::Relaxed))
    }
}

/// State shared between the channel handle and its background loops.
struct Shared {
    tuning: ChannelTuning,
    state: Mutex<ChannelState>,
    /// Flipped by the receive loop when the connect ack arrives; the
    /// handshake loop watches it.
    conn_acked: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    shutdown_seed: watch::Receiver<bool>,
    events: mpsc::Sender<TransportEvent>,
    packets: mpsc::Sender<Packet>,
    outbound: mpsc::UnboundedSender<String>,
    clock: AckClock,
    debug_logging: AtomicBool,
}

impl Shared {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: ChannelState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    /// Move to `Closed`. Returns `true` only for the transition that got
    /// there first, so close-effects run at most once.
    fn transition_closed(&self) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *guard == ChannelState::Closed {
            return false;
        }
        *guard = ChannelState::Closed;
        true
    }

    /// Best-effort event emission: a consumer that stops reading loses
    /// events rather than stalling the protocol loops.
    fn emit(&self, event: TransportEvent) {
        if let Err(err) = self.events.try_send(event) {
            tracing::trace!(%err, "channel event dropped");
        }
    }

    fn send_internal(&self, header: &str, content: serde_json::Map<String, serde_json::Value>) {
        let packet = Packet::internal(header, content);
        match codec::encode(&packet) {
            Ok(wire) => {
                if self.outbound.send(wire).is_err() {
                    tracing::trace!(header, "outbound queue closed, datagram dropped");
                }
            }
            Err(err) => tracing::warn!(%err, header, "datagram encode failed"),
        }
    }

    /// Handle an inbound heartbeat acknowledgement.
    ///
    /// A malformed stamp is logged and refreshes nothing: it neither
    /// updates RTT nor counts as liveness.
    fn handle_ack(&self, packet: &Packet) {
        match packet.content_i64("stamp") {
            Some(stamp) => {
                self.clock.refresh(stamp);
                if self.debug_logging.load(Ordering::Relaxed) {
                    tracing::debug!(rtt_ms = self.clock.rtt().as_millis() as u64, "ack received");
                }
            }
            None => {
                tracing::error!(%packet, "malformed ack content, ignoring");
            }
        }
    }

    fn handle_datagram(&self, text: &str) {
        if self.debug_logging.load(Ordering::Relaxed) {
            tracing::debug!(len = text.len(), "received datagram");
        }
        let packet = codec::decode(text);

        if packet.is_internal() {
            match packet.header() {
                headers::DATAGRAM_CONN => {
                    let _ = self.conn_acked.send(true);
                }
                headers::DATAGRAM_PING => self.handle_ack(&packet),
                // Internal traffic the channel itself does not consume is
                // forwarded decoded; the consumer routes it.
                _ => {
                    if let Err(err) = self.packets.try_send(packet) {
                        tracing::trace!(%err, "channel packet dropped");
                    }
                }
            }
            return;
        }

        // Non-internal datagrams go out both raw and decoded.
        self.emit(TransportEvent::Message(text.to_string()));
        if let Err(err) = self.packets.try_send(packet) {
            tracing::trace!(%err, "channel packet dropped");
        }
    }
}

/// A concrete [`Transport`] over an unreliable, unordered UDP socket,
/// with its own connection-establishment and liveness protocol.
///
/// Protocol: bind an ephemeral socket and start a receive loop; retry an
/// internal connect request at a fixed interval until the peer's ack is
/// observed or the attempt budget is exhausted; once connected, send a
/// stamped heartbeat every interval and declare the channel dead when no
/// acknowledgement has arrived within the staleness threshold.
///
/// Loss is tolerated, not recovered: there is no retransmission of
/// payload traffic and no delivery ordering.
pub struct DatagramChannel {
    shared: Arc<Shared>,
    started: AtomicBool,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    packets_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl DatagramChannel {
    /// Create an idle channel with protocol-default tuning.
    pub fn new() -> Self {
        Self::with_tuning(ChannelTuning::default())
    }

    /// Create an idle channel with custom timing.
    pub fn with_tuning(tuning: ChannelTuning) -> Self {
        let (conn_acked, _) = watch::channel(false);
        let (shutdown, shutdown_seed) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (packets_tx, packets_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                tuning,
                state: Mutex::new(ChannelState::Idle),
                conn_acked,
                shutdown,
                shutdown_seed,
                events: events_tx,
                packets: packets_tx,
                outbound: outbound_tx,
                clock: AckClock::new(),
                debug_logging: AtomicBool::new(false),
            }),
            started: AtomicBool::new(false),
            events_rx: Mutex::new(Some(events_rx)),
            packets_rx: Mutex::new(Some(packets_rx)),
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Whether the handshake has completed and the channel is live.
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Last heartbeat round trip; zero before the first acknowledgement.
    pub fn rtt(&self) -> Duration {
        self.shared.clock.rtt()
    }

    /// Take the decoded-packet stream: non-internal datagrams plus any
    /// internal datagrams the channel does not consume itself. Yields
    /// `Some` exactly once.
    pub fn take_packets(&self) -> Option<mpsc::Receiver<Packet>> {
        self.packets_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Default for DatagramChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DatagramChannel {
    fn connect(&self, config: &ConnectionConfig) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        let outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(TransportError::AlreadyConnected)?;

        self.shared
            .debug_logging
            .store(config.debug_logging, Ordering::Relaxed);
        self.shared.set_state(ChannelState::Handshaking);

        tokio::spawn(drive(Arc::clone(&self.shared), config.clone(), outbound_rx));
        Ok(())
    }

    fn send(&self, data: &str) -> Result<(), TransportError> {
        self.shared
            .outbound
            .send(data.to_string())
            .map_err(|_| TransportError::NotConnected)
    }

    /// Cancel every background loop and release the socket. Idempotent;
    /// closing an unconnected channel is a no-op beyond marking it
    /// `Closed`.
    fn close(&self) {
        if self.shared.transition_closed() {
            tracing::debug!("closing datagram channel");
            let _ = self.shared.shutdown.send(true);
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Drop for DatagramChannel {
    fn drop(&mut self) {
        if self.shared.transition_closed() {
            let _ = self.shared.shutdown.send(true);
        }
    }
}

/// Bring the socket up and hand control to the protocol loops.
async fn drive(
    shared: Arc<Shared>,
    config: ConnectionConfig,
    outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let endpoint = config.endpoint();
    let remote = match tokio::net::lookup_host(endpoint.clone()).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                shared.emit(TransportEvent::Error(TransportError::InvalidAddress(endpoint)));
                return;
            }
        },
        Err(err) => {
            tracing::warn!(%err, endpoint, "address resolution failed");
            shared.emit(TransportEvent::Error(TransportError::InvalidAddress(endpoint)));
            return;
        }
    };

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => Arc::new(socket),
        Err(err) => {
            shared.emit(TransportEvent::Error(err.into()));
            return;
        }
    };
    if let Err(err) = socket.connect(remote).await {
        shared.emit(TransportEvent::Error(err.into()));
        return;
    }
    tracing::debug!(%remote, "datagram socket bound");

    tokio::spawn(write_loop(
        Arc::clone(&shared),
        Arc::clone(&socket),
        outbound_rx,
    ));
    tokio::spawn(receive_loop(Arc::clone(&shared), Arc::clone(&socket)));
    tokio::spawn(handshake_loop(shared));
}

/// Drain the outbound queue onto the socket.
async fn write_loop(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut shutdown = shared.shutdown_seed.clone();
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if let Err(err) = socket.send(msg.as_bytes()).await {
                    tracing::warn!(%err, "datagram send failed");
                }
            }
        }
    }
}

/// Continuous receive loop; never blocks the caller, exits on shutdown.
async fn receive_loop(shared: Arc<Shared>, socket: Arc<UdpSocket>) {
    let mut shutdown = shared.shutdown_seed.clone();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            res = socket.recv(&mut buf) => {
                match res {
                    Ok(len) => {
                        let text = String::from_utf8_lossy(&buf[..len]);
                        shared.handle_datagram(&text);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "datagram receive failed");
                        shared.emit(TransportEvent::Error(err.into()));
                    }
                }
            }
        }
    }
    tracing::debug!("receive loop stopped");
}

/// Retry the connect request until acked or out of attempts.
async fn handshake_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown_seed.clone();
    let mut acked = shared.conn_acked.subscribe();
    let mut attempts = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }
        if *acked.borrow() {
            break;
        }
        if attempts >= shared.tuning.max_handshake_attempts {
            tracing::warn!(attempts, "handshake attempts exhausted");
            shared.set_state(ChannelState::Closed);
            shared.emit(TransportEvent::Error(TransportError::AttemptsExhausted {
                attempts,
            }));
            let _ = shared.shutdown.send(true);
            return;
        }

        tracing::debug!(attempt = attempts + 1, "sending connect request");
        shared.send_internal(headers::DATAGRAM_CONN, serde_json::Map::new());
        attempts += 1;

        tokio::select! {
            _ = time::sleep(shared.tuning.handshake_retry_interval) => {}
            _ = acked.changed() => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::info!(attempts, "datagram handshake complete");
    shared.set_state(ChannelState::Connected);
    shared.emit(TransportEvent::Connected);
    tokio::spawn(heartbeat_loop(shared));
}

/// Staleness check plus stamped ping, every heartbeat interval.
///
/// This loop is the only place that detects silent peer failure: when no
/// acknowledgement has arrived within the staleness threshold it flips
/// the channel to `Closed`, fires the closed event once, and cancels all
/// of the channel's loops without waiting for an explicit close.
async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown_seed.clone();
    shared.clock.reset();

    loop {
        if *shutdown.borrow() {
            break;
        }

        if shared.clock.since_last_ack() >= shared.tuning.staleness_threshold {
            tracing::warn!("ack staleness threshold exceeded, closing channel");
            if shared.transition_closed() {
                shared.emit(TransportEvent::Closed);
                let _ = shared.shutdown.send(true);
            }
            break;
        }

        let mut content = serde_json::Map::new();
        content.insert("stamp".to_string(), serde_json::json!(unix_millis()));
        shared.send_internal(headers::DATAGRAM_PING, content);

        tokio::select! {
            _ = time::sleep(shared.tuning.heartbeat_interval) => {}
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("heartbeat loop stopped");
}
