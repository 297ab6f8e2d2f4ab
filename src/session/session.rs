//! The session core: connection bring-up, heartbeat liveness, and packet
//! dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::core::constants::{
    CONNECT_WARMUP_DELAY, EVENT_CHANNEL_CAPACITY, SESSION_PING_INTERVAL,
};
use crate::core::{ConnectionConfig, SessionError};
use crate::transport::{Transport, TransportEvent};
use crate::wire::{Packet, codec, headers};

/// Something observable happened on a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The underlying transport connected; the heartbeat is now running.
    Connected,
    /// The server assigned the session identity. Fires exactly once.
    Ready(String),
    /// The session closed; there is no automatic reconnect.
    Closed,
    /// A failure on a background path.
    Error(SessionError),
}

/// Single-sample round-trip clock for the session heartbeat.
///
/// One ping may be in flight at a time; a reply with no outstanding ping
/// is ignored. The last sample is readable from any thread and is zero
/// before the first measurement.
#[derive(Debug, Default)]
struct PingClock {
    in_flight: Mutex<Option<Instant>>,
    rtt_ms: AtomicU64,
}

impl PingClock {
    fn mark_sent(&self) {
        let mut guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Instant::now());
    }

    /// Record a ping reply. Returns the sample, or `None` if no ping was
    /// outstanding.
    fn on_reply(&self) -> Option<Duration> {
        let mut guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let sent_at = guard.take()?;
        let rtt = sent_at.elapsed();
        self.rtt_ms.store(rtt.as_millis() as u64, Ordering::Relaxed);
        Some(rtt)
    }

    fn rtt(&self) -> Duration {
        Duration::from_millis(self.rtt_ms.load(Ordering::Relaxed))
    }
}

/// State shared between the session handle and its background loops.
#[derive(Debug, Default)]
struct SessionState {
    identity: OnceLock<String>,
    clock: PingClock,
}

/// Outcome of dispatching one inbound message.
#[derive(Debug)]
enum Dispatch {
    /// Heartbeat reply consumed; RTT sample updated.
    PongAccepted(Duration),
    /// Heartbeat reply with no ping in flight; ignored.
    PongIgnored,
    /// The one-time identification packet was accepted.
    IdentityAssigned(String),
    /// Internal packet for the consumer's dispatch table.
    Internal(Packet),
    /// Application payload packet.
    Application(Packet),
}

/// Route one decoded packet.
///
/// `Err(SessionError::IdentityAlreadySet)` is the only fatal outcome; a
/// missing id on the identification packet is reported but survivable.
fn dispatch(state: &SessionState, packet: Packet) -> Result<Dispatch, SessionError> {
    if !packet.is_internal() {
        return Ok(Dispatch::Application(packet));
    }

    match packet.header() {
        headers::SESSION_PING => Ok(match state.clock.on_reply() {
            Some(rtt) => Dispatch::PongAccepted(rtt),
            None => Dispatch::PongIgnored,
        }),
        headers::SESSION_ID => {
            let id = packet
                .content_str("id")
                .ok_or(SessionError::MissingIdentity)?
                .to_string();
            state
                .identity
                .set(id.clone())
                .map_err(|_| SessionError::IdentityAlreadySet)?;
            Ok(Dispatch::IdentityAssigned(id))
        }
        _ => Ok(Dispatch::Internal(packet)),
    }
}

/// One logical duplex connection plus its packet router and heartbeat.
///
/// `run` returns immediately; all network work happens on background
/// tasks. The session never reconnects on its own: after a `Closed` event
/// the caller builds a new session if it wants one.
pub struct Session {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: Arc<SessionState>,
    started: bool,
    shutdown: watch::Sender<bool>,
    /// Seed receiver created alongside the sender, so loops subscribed via
    /// clones observe a close that happens before they start.
    shutdown_seed: watch::Receiver<bool>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    internal_tx: mpsc::Sender<Packet>,
    internal_rx: Option<mpsc::Receiver<Packet>>,
    packets_tx: mpsc::Sender<Packet>,
    packets_rx: Option<mpsc::Receiver<Packet>>,
}

impl Session {
    /// Create a session over the given transport. Nothing happens until
    /// [`run`](Self::run).
    pub fn new(transport: impl Transport, config: ConnectionConfig) -> Self {
        let (shutdown, shutdown_seed) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (packets_tx, packets_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport: Arc::new(transport),
            config,
            state: Arc::new(SessionState::default()),
            started: false,
            shutdown,
            shutdown_seed,
            events_tx,
            events_rx: Some(events_rx),
            internal_tx,
            internal_rx: Some(internal_rx),
            packets_tx,
            packets_rx: Some(packets_rx),
        }
    }

    /// Begin connecting on a background task after a short warm-up delay.
    ///
    /// Calling this twice fails with [`SessionError::AlreadyStarted`].
    /// Must be called from within a tokio runtime.
    pub fn run(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        self.started = true;

        let transport_events = self
            .transport
            .take_events()
            .ok_or(SessionError::AlreadyStarted)?;

        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            time::sleep(CONNECT_WARMUP_DELAY).await;
            tracing::debug!("starting connection");
            if let Err(err) = transport.connect(&config) {
                let _ = events.try_send(SessionEvent::Error(err.into()));
            }
        });

        let driver = Driver {
            transport: Arc::clone(&self.transport),
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
            events: self.events_tx.clone(),
            internal: self.internal_tx.clone(),
            packets: self.packets_tx.clone(),
            debug_logging: self.config.debug_logging,
        };
        let shutdown_rx = self.shutdown_seed.clone();
        tokio::spawn(driver.run(transport_events, shutdown_rx));

        Ok(())
    }

    /// Send a packet; encode and transport failures are logged, never
    /// propagated.
    pub fn send(&self, packet: Packet) {
        tracing::debug!(header = packet.header(), "sending packet");
        match codec::encode(&packet) {
            Ok(wire) => {
                if let Err(err) = self.transport.send(&wire) {
                    tracing::warn!(%err, header = packet.header(), "transport send failed");
                }
            }
            Err(err) => tracing::warn!(%err, header = packet.header(), "packet encode failed"),
        }
    }

    /// Close the transport and cancel the background loops. Idempotent.
    pub fn close(&self) {
        tracing::debug!("closing session");
        let _ = self.shutdown.send(true);
        self.transport.close();
    }

    /// Last measured heartbeat round trip; zero before the first sample.
    pub fn rtt(&self) -> Duration {
        self.state.clock.rtt()
    }

    /// The server-assigned session identity, once the identification
    /// handshake completed.
    pub fn identity(&self) -> Option<String> {
        self.state.identity.get().cloned()
    }

    /// Take the session event stream. Yields `Some` exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Take the internal-packet stream (reserved headers the core does not
    /// itself consume). Yields `Some` exactly once.
    pub fn take_internal_packets(&mut self) -> Option<mpsc::Receiver<Packet>> {
        self.internal_rx.take()
    }

    /// Take the application-packet stream. Yields `Some` exactly once.
    pub fn take_packets(&mut self) -> Option<mpsc::Receiver<Packet>> {
        self.packets_rx.take()
    }
}

/// The receive-path loop, owned by a spawned task.
struct Driver {
    transport: Arc<dyn Transport>,
    state: Arc<SessionState>,
    shutdown: watch::Sender<bool>,
    events: mpsc::Sender<SessionEvent>,
    internal: mpsc::Sender<Packet>,
    packets: mpsc::Sender<Packet>,
    debug_logging: bool,
}

impl Driver {
    async fn run(
        self,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut heartbeat_started = false;

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
                event = transport_events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        TransportEvent::Connected => {
                            tracing::info!("connected");
                            self.emit(SessionEvent::Connected);
                            if !heartbeat_started {
                                heartbeat_started = true;
                                tokio::spawn(heartbeat(
                                    Arc::clone(&self.transport),
                                    Arc::clone(&self.state),
                                    shutdown.clone(),
                                ));
                            }
                        }
                        TransportEvent::Closed => {
                            tracing::info!("transport closed");
                            self.emit(SessionEvent::Closed);
                        }
                        TransportEvent::Error(err) => {
                            tracing::warn!(%err, "transport error");
                            self.emit(SessionEvent::Error(err.into()));
                        }
                        TransportEvent::Message(text) => {
                            if self.debug_logging {
                                tracing::debug!(%text, "receiving");
                            }
                            if !self.handle_message(&text).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Dispatch one inbound message. Returns `false` when the failure is
    /// fatal and the session must tear down.
    async fn handle_message(&self, text: &str) -> bool {
        let packet = codec::decode(text);
        match dispatch(&self.state, packet) {
            Ok(Dispatch::PongAccepted(rtt)) => {
                tracing::debug!(rtt_ms = rtt.as_millis() as u64, "received pong");
            }
            Ok(Dispatch::PongIgnored) => {
                tracing::debug!("pong with no ping in flight, ignoring");
            }
            Ok(Dispatch::IdentityAssigned(id)) => {
                tracing::info!(identity = %id, "session identity assigned");
                self.emit(SessionEvent::Ready(id));
            }
            Ok(Dispatch::Internal(packet)) => {
                let _ = self.internal.send(packet).await;
            }
            Ok(Dispatch::Application(packet)) => {
                let _ = self.packets.send(packet).await;
            }
            Err(err @ SessionError::IdentityAlreadySet) => {
                tracing::error!(%err, "fatal: duplicate identification, closing session");
                self.emit(SessionEvent::Error(err));
                let _ = self.shutdown.send(true);
                self.transport.close();
                self.emit(SessionEvent::Closed);
                return false;
            }
            Err(err) => {
                tracing::warn!(%err, "bad internal packet");
                self.emit(SessionEvent::Error(err));
            }
        }
        true
    }

    /// Caller-facing events are best effort: a consumer that stops
    /// reading loses events rather than stalling the receive path.
    fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.events.try_send(event) {
            tracing::trace!(%err, "session event dropped");
        }
    }
}

/// Periodic heartbeat: one internal ping per interval, first one
/// immediately on connect.
async fn heartbeat(
    transport: Arc<dyn Transport>,
    state: Arc<SessionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("heartbeat loop running");
    let mut ticker = time::interval(SESSION_PING_INTERVAL);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

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
            _ = ticker.tick() => {
                tracing::debug!("sending ping");
                state.clock.mark_sent();
                let ping = Packet::internal_empty(headers::SESSION_PING);
                match codec::encode(&ping) {
                    Ok(wire) => {
                        if let Err(err) = transport.send(&wire) {
                            tracing::warn!(%err, "heartbeat send failed");
                        }
                    }
                    Err(err) => tracing::warn!(%err, "heartbeat encode failed"),
                }
            }
        }
    }
    tracing::debug!("heartbeat loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::sync::atomic::AtomicBool;

    /// In-memory transport: messages are injected through a handle and
    /// sends are captured for inspection.
    struct MockTransport {
        events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
        sent: Arc<Mutex<Vec<String>>>,
        connected: AtomicBool,
    }

    fn mock_transport() -> (
        MockTransport,
        mpsc::Sender<TransportEvent>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            events: Mutex::new(Some(rx)),
            sent: Arc::clone(&sent),
            connected: AtomicBool::new(false),
        };
        (transport, tx, sent)
    }

    impl Transport for MockTransport {
        fn connect(&self, _config: &ConnectionConfig) -> Result<(), crate::core::TransportError> {
            if self.connected.swap(true, Ordering::SeqCst) {
                return Err(crate::core::TransportError::AlreadyConnected);
            }
            Ok(())
        }

        fn send(&self, data: &str) -> Result<(), crate::core::TransportError> {
            self.sent.lock().unwrap().push(data.to_string());
            Ok(())
        }

        fn close(&self) {}

        fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
            self.events.lock().unwrap().take()
        }
    }

    fn id_packet(id: &str) -> String {
        let mut content = Map::new();
        content.insert("id".to_string(), json!(id));
        codec::encode(&Packet::internal(headers::SESSION_ID, content)).unwrap()
    }

    async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event stream ended")
    }

    #[test]
    fn test_dispatch_pong_without_ping_ignored() {
        let state = SessionState::default();
        let reply = Packet::internal_empty(headers::SESSION_PING);
        match dispatch(&state, reply).unwrap() {
            Dispatch::PongIgnored => {}
            other => panic!("expected PongIgnored, got {other:?}"),
        }
        assert_eq!(state.clock.rtt(), Duration::ZERO);
    }

    #[test]
    fn test_dispatch_pong_measures_rtt() {
        let state = SessionState::default();
        state.clock.mark_sent();
        std::thread::sleep(Duration::from_millis(10));

        let reply = Packet::internal_empty(headers::SESSION_PING);
        match dispatch(&state, reply).unwrap() {
            Dispatch::PongAccepted(rtt) => assert!(rtt >= Duration::from_millis(10)),
            other => panic!("expected PongAccepted, got {other:?}"),
        }
        assert!(state.clock.rtt() >= Duration::from_millis(10));

        // A second reply has no ping in flight and leaves the sample alone.
        let before = state.clock.rtt();
        let reply = Packet::internal_empty(headers::SESSION_PING);
        match dispatch(&state, reply).unwrap() {
            Dispatch::PongIgnored => {}
            other => panic!("expected PongIgnored, got {other:?}"),
        }
        assert_eq!(state.clock.rtt(), before);
    }

    #[test]
    fn test_dispatch_identity_set_once() {
        let state = SessionState::default();
        let mut content = Map::new();
        content.insert("id".to_string(), json!("client-7"));

        let first = Packet::internal(headers::SESSION_ID, content.clone());
        match dispatch(&state, first).unwrap() {
            Dispatch::IdentityAssigned(id) => assert_eq!(id, "client-7"),
            other => panic!("expected IdentityAssigned, got {other:?}"),
        }

        let second = Packet::internal(headers::SESSION_ID, content);
        assert!(matches!(
            dispatch(&state, second),
            Err(SessionError::IdentityAlreadySet)
        ));
        assert_eq!(state.identity.get().map(String::as_str), Some("client-7"));
    }

    #[test]
    fn test_dispatch_identity_missing_id() {
        let state = SessionState::default();
        let packet = Packet::internal_empty(headers::SESSION_ID);
        assert!(matches!(
            dispatch(&state, packet),
            Err(SessionError::MissingIdentity)
        ));
        assert!(state.identity.get().is_none());
    }

    #[test]
    fn test_dispatch_split() {
        let state = SessionState::default();

        let internal = Packet::internal_empty("RGS:SEARCH");
        assert!(matches!(
            dispatch(&state, internal).unwrap(),
            Dispatch::Internal(_)
        ));

        let app = Packet::new("game", "MOVE", Map::new());
        assert!(matches!(
            dispatch(&state, app).unwrap(),
            Dispatch::Application(_)
        ));
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let (transport, _tx, _sent) = mock_transport();
        let mut session = Session::new(transport, ConnectionConfig::default());
        session.run().unwrap();
        assert!(matches!(session.run(), Err(SessionError::AlreadyStarted)));
        session.close();
    }

    #[tokio::test]
    async fn test_heartbeat_pings_after_connect() {
        let (transport, tx, sent) = mock_transport();
        let mut session = Session::new(transport, ConnectionConfig::default());
        let mut events = session.take_events().unwrap();
        session.run().unwrap();

        tx.send(TransportEvent::Connected).await.unwrap();
        assert!(matches!(next_event(&mut events).await, SessionEvent::Connected));

        // First ping goes out immediately when the heartbeat starts.
        for _ in 0..50 {
            if !sent.lock().unwrap().is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        let wire = sent.lock().unwrap().first().cloned().expect("no ping sent");
        let ping = codec::decode(&wire);
        assert!(ping.is_internal());
        assert_eq!(ping.header(), headers::SESSION_PING);

        session.close();
    }

    #[tokio::test]
    async fn test_identity_ready_then_duplicate_is_fatal() {
        let (transport, tx, _sent) = mock_transport();
        let mut session = Session::new(transport, ConnectionConfig::default());
        let mut events = session.take_events().unwrap();
        session.run().unwrap();

        tx.send(TransportEvent::Message(id_packet("u1"))).await.unwrap();
        match next_event(&mut events).await {
            SessionEvent::Ready(id) => assert_eq!(id, "u1"),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(session.identity().as_deref(), Some("u1"));

        tx.send(TransportEvent::Message(id_packet("u2"))).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Error(SessionError::IdentityAlreadySet)
        ));
        assert!(matches!(next_event(&mut events).await, SessionEvent::Closed));
        assert_eq!(session.identity().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_packet_streams_split() {
        let (transport, tx, _sent) = mock_transport();
        let mut session = Session::new(transport, ConnectionConfig::default());
        let mut internal = session.take_internal_packets().unwrap();
        let mut packets = session.take_packets().unwrap();
        session.run().unwrap();

        let rgs = codec::encode(&Packet::internal_empty("RGS:SEARCH")).unwrap();
        let app = codec::encode(&Packet::new("game", "MOVE", Map::new())).unwrap();
        tx.send(TransportEvent::Message(rgs)).await.unwrap();
        tx.send(TransportEvent::Message(app)).await.unwrap();

        let received = time::timeout(Duration::from_secs(1), internal.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.header(), "RGS:SEARCH");

        let received = time::timeout(Duration::from_secs(1), packets.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.header(), "MOVE");

        session.close();
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_stop_dispatch() {
        let (transport, tx, _sent) = mock_transport();
        let mut session = Session::new(transport, ConnectionConfig::default());
        let mut packets = session.take_packets().unwrap();
        session.run().unwrap();

        tx.send(TransportEvent::Message("{garbage".to_string()))
            .await
            .unwrap();
        let app = codec::encode(&Packet::new("game", "MOVE", Map::new())).unwrap();
        tx.send(TransportEvent::Message(app)).await.unwrap();

        // The sentinel from the malformed message is an application packet
        // with empty type; the real one still arrives after it.
        let sentinel = time::timeout(Duration::from_secs(1), packets.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(sentinel.is_empty());
        let received = time::timeout(Duration::from_secs(1), packets.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.header(), "MOVE");

        session.close();
    }
}
