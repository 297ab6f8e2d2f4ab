//! The match client: a session core plus the matchmaking state machine
//! and an optional per-match datagram channel.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::core::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::{ConnectionConfig, MatchError, SessionError, TransportError};
use crate::datagram::{ChannelState, ChannelTuning, DatagramChannel};
use crate::session::{Session, SessionEvent};
use crate::transport::{Transport, TransportEvent};
use crate::wire::{Packet, codec, headers};

use super::state::{ChannelIdentity, MatchAction, MatchEvent, MatchState, apply_internal};
use super::update::StateUpdate;

/// State shared between the client handle and its dispatch tasks.
struct Inner {
    state: Mutex<MatchState>,
    /// The live match channel, if one has been granted.
    channel: Mutex<Option<Arc<DatagramChannel>>>,
    channel_identity: Mutex<ChannelIdentity>,
    /// Session identity, mirrored here once the `Ready` event fires.
    identity: OnceLock<String>,
    events: mpsc::Sender<MatchEvent>,
    channel_config: ConnectionConfig,
    tuning: ChannelTuning,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, MatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Best-effort event emission: a consumer that stops reading loses
    /// events rather than stalling the dispatch loop.
    fn emit(&self, event: MatchEvent) {
        if let Err(err) = self.events.try_send(event) {
            tracing::trace!(%err, "match event dropped");
        }
    }

    /// Close and discard the match channel, if one is live. Emits
    /// `ChannelClosed` only when a channel was actually present, so the
    /// event fires at most once per channel.
    fn teardown_channel(&self) {
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        {
            let mut guard = self
                .channel_identity
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *guard = ChannelIdentity::default();
        }
        if let Some(channel) = channel {
            channel.close();
            self.emit(MatchEvent::ChannelClosed);
        }
    }
}

/// Run one internal packet through the state machine and perform the side
/// effects it requested. Locks are released before any effect runs.
fn apply(inner: &Arc<Inner>, packet: &Packet) {
    let outcome = {
        let mut state = inner.lock_state();
        let channel_active = inner
            .channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        apply_internal(
            &mut state,
            packet,
            inner.identity.get().map(String::as_str),
            channel_active,
        )
    };

    for action in outcome.actions {
        match action {
            MatchAction::SpawnChannel(identity) => spawn_channel(inner, identity),
            MatchAction::TeardownChannel => inner.teardown_channel(),
        }
    }
    for event in outcome.events {
        inner.emit(event);
    }
}

/// Bring up the match datagram channel and wire its streams back into the
/// state machine.
fn spawn_channel(inner: &Arc<Inner>, identity: ChannelIdentity) {
    tracing::info!(
        group = %identity.match_group_id,
        "match channel granted, connecting"
    );
    let channel = Arc::new(DatagramChannel::with_tuning(inner.tuning.clone()));
    let Some(mut events) = channel.take_events() else {
        return;
    };
    let Some(mut packets) = channel.take_packets() else {
        return;
    };
    if let Err(err) = channel.connect(&inner.channel_config) {
        tracing::warn!(%err, "match channel connect failed");
        return;
    }

    {
        let mut guard = inner
            .channel_identity
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *guard = identity;
    }
    {
        let mut slot = inner.channel.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::clone(&channel));
    }

    let forward = Arc::clone(inner);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => forward.emit(MatchEvent::ChannelConnected),
                TransportEvent::Closed => {
                    forward.teardown_channel();
                    break;
                }
                TransportEvent::Error(err) => {
                    tracing::warn!(%err, "match channel error");
                    if matches!(err, TransportError::AttemptsExhausted { .. }) {
                        forward.teardown_channel();
                        break;
                    }
                }
                // Raw copies; the decoded packet stream is authoritative.
                TransportEvent::Message(_) => {}
            }
        }
    });

    let dispatch = Arc::clone(inner);
    tokio::spawn(async move {
        while let Some(packet) = packets.recv().await {
            if packet.is_internal() {
                apply(&dispatch, &packet);
            } else {
                dispatch.emit(MatchEvent::Message(packet));
            }
        }
    });
}

/// A matchmaking client over one session.
///
/// Commands validate against the local state snapshot and fail fast on
/// misuse; the state itself only advances when the server's reply comes
/// back through the dispatch loop. The match datagram channel is created
/// when the server grants one and torn down when the match ends, exits,
/// or disbands.
pub struct MatchClient {
    session: Session,
    inner: Arc<Inner>,
    session_events_tx: mpsc::Sender<SessionEvent>,
    session_events_rx: Option<mpsc::Receiver<SessionEvent>>,
    events_rx: Option<mpsc::Receiver<MatchEvent>>,
}

impl MatchClient {
    /// Create a client over the given transport. `channel_config` is the
    /// endpoint a granted match channel will connect to. Nothing happens
    /// until [`run`](Self::run).
    pub fn new(
        transport: impl Transport,
        config: ConnectionConfig,
        channel_config: ConnectionConfig,
    ) -> Self {
        Self::with_channel_tuning(transport, config, channel_config, ChannelTuning::default())
    }

    /// Create a client with custom match-channel timing.
    pub fn with_channel_tuning(
        transport: impl Transport,
        config: ConnectionConfig,
        channel_config: ConnectionConfig,
        tuning: ChannelTuning,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (session_events_tx, session_events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session: Session::new(transport, config),
            inner: Arc::new(Inner {
                state: Mutex::new(MatchState::default()),
                channel: Mutex::new(None),
                channel_identity: Mutex::new(ChannelIdentity::default()),
                identity: OnceLock::new(),
                events: events_tx,
                channel_config,
                tuning,
            }),
            session_events_tx,
            session_events_rx: Some(session_events_rx),
            events_rx: Some(events_rx),
        }
    }

    /// Start the session and the matchmaking dispatch loop.
    ///
    /// Calling this twice fails. Must be called from within a tokio
    /// runtime.
    pub fn run(&mut self) -> Result<(), MatchError> {
        let internal = self
            .session
            .take_internal_packets()
            .ok_or(SessionError::AlreadyStarted)?;
        let session_events = self
            .session
            .take_events()
            .ok_or(SessionError::AlreadyStarted)?;
        self.session.run()?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut internal = internal;
            while let Some(packet) = internal.recv().await {
                apply(&inner, &packet);
            }
            tracing::debug!("match dispatch loop stopped");
        });

        // Session events pass through to the caller; the Ready identity is
        // mirrored on the way past for self-exit detection.
        let inner = Arc::clone(&self.inner);
        let forward = self.session_events_tx.clone();
        tokio::spawn(async move {
            let mut session_events = session_events;
            while let Some(event) = session_events.recv().await {
                if let SessionEvent::Ready(id) = &event {
                    let _ = inner.identity.set(id.clone());
                }
                if let Err(err) = forward.try_send(event) {
                    tracing::trace!(%err, "session event dropped");
                }
            }
        });

        Ok(())
    }

    /// Ask the server to add this client to the matchmaking queue.
    ///
    /// The queue membership flag only flips when the server acknowledges.
    pub fn join_queue(&self) -> Result<(), MatchError> {
        {
            let state = self.inner.lock_state();
            if state.in_match {
                return Err(MatchError::AlreadyInMatch);
            }
            if state.in_queue {
                return Err(MatchError::AlreadyQueued);
            }
        }
        self.session
            .send(Packet::internal_empty(headers::MATCH_SEARCH));
        Ok(())
    }

    /// Ask the server to remove this client from the matchmaking queue.
    pub fn leave_queue(&self) -> Result<(), MatchError> {
        if !self.inner.lock_state().in_queue {
            return Err(MatchError::NotQueued);
        }
        self.session
            .send(Packet::internal_empty(headers::MATCH_LEAVE));
        Ok(())
    }

    /// Confirm the proposed match. Valid at most once per open
    /// confirmation window.
    pub fn confirm_match(&self) -> Result<(), MatchError> {
        let match_id = {
            let mut state = self.inner.lock_state();
            if !state.confirmation_open {
                return Err(MatchError::NoConfirmationOpen);
            }
            if state.client_confirmed {
                return Err(MatchError::AlreadyConfirmed);
            }
            state.client_confirmed = true;
            state.pending_match_id.clone()
        };

        let mut content = Map::new();
        if let Some(id) = match_id {
            content.insert("matchId".to_string(), Value::String(id));
        }
        self.session
            .send(Packet::internal(headers::MATCH_CONFIRM, content));
        Ok(())
    }

    /// Leave the running match. The match only clears locally when the
    /// server echoes the exit back.
    pub fn exit_match(&self) -> Result<(), MatchError> {
        let match_id = {
            let state = self.inner.lock_state();
            if !state.in_match {
                return Err(MatchError::NotInMatch);
            }
            state.current_match_id.clone()
        };

        let mut content = Map::new();
        if let Some(id) = match_id {
            content.insert("matchId".to_string(), Value::String(id));
        }
        self.session
            .send(Packet::internal(headers::MATCH_EXIT, content));
        Ok(())
    }

    /// Send an arbitrary payload to every participant via the server.
    pub fn broadcast(&self, payload: Value) {
        let mut content = Map::new();
        content.insert("delivery".to_string(), payload);
        self.session
            .send(Packet::internal(headers::MATCH_BROADCAST, content));
    }

    /// Send a state update over the match channel.
    pub fn send_state_update(&self, update: &StateUpdate) -> Result<(), MatchError> {
        let value = serde_json::to_value(update).unwrap_or(Value::Null);
        let Value::Object(content) = value else {
            tracing::warn!("state update did not serialize to an object");
            return Ok(());
        };
        self.send_over_channel(headers::MATCH_STATE_UPDATE, content)
    }

    /// Send an opaque message over the match channel.
    pub fn send_message_update(&self, content: Map<String, Value>) -> Result<(), MatchError> {
        self.send_over_channel(headers::MATCH_MESSAGE_UPDATE, content)
    }

    /// Send a world-level update over the match channel.
    pub fn send_world_update(&self, content: Map<String, Value>) -> Result<(), MatchError> {
        self.send_over_channel(headers::MATCH_WORLD_UPDATE, content)
    }

    /// Tag the content with the channel identity and put it on the wire.
    /// Guards are hard errors; send failures are logged, not propagated.
    fn send_over_channel(
        &self,
        header: &str,
        mut content: Map<String, Value>,
    ) -> Result<(), MatchError> {
        if !self.inner.lock_state().in_match {
            return Err(MatchError::NotInMatch);
        }
        let channel = self
            .inner
            .channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(MatchError::ChannelUnavailable)?;

        {
            let identity = self
                .inner
                .channel_identity
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            content.insert(
                "identifier".to_string(),
                Value::String(identity.ephemeral_id.clone()),
            );
            content.insert(
                "groupId".to_string(),
                Value::String(identity.match_group_id.clone()),
            );
        }
        if let Some(id) = self.inner.identity.get() {
            content.insert("clientId".to_string(), Value::String(id.clone()));
        }

        let packet = Packet::internal(header, content);
        match codec::encode(&packet) {
            Ok(wire) => {
                if let Err(err) = channel.send(&wire) {
                    tracing::warn!(%err, header, "match channel send failed");
                }
            }
            Err(err) => tracing::warn!(%err, header, "match packet encode failed"),
        }
        Ok(())
    }

    /// Tear down the match channel, if any, and close the session.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.teardown_channel();
        self.session.close();
    }

    /// A snapshot of the matchmaking state.
    pub fn state(&self) -> MatchState {
        self.inner.lock_state().clone()
    }

    /// The server-assigned session identity, once assigned.
    pub fn identity(&self) -> Option<String> {
        self.session.identity()
    }

    /// Last session heartbeat round trip; zero before the first sample.
    pub fn rtt(&self) -> Duration {
        self.session.rtt()
    }

    /// Lifecycle state of the match channel, if one exists.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.inner
            .channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|channel| channel.state())
    }

    /// Last match-channel round trip, if a channel exists.
    pub fn channel_rtt(&self) -> Option<Duration> {
        self.inner
            .channel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|channel| channel.rtt())
    }

    /// Take the match event stream. Yields `Some` exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<MatchEvent>> {
        self.events_rx.take()
    }

    /// Take the forwarded session event stream. Yields `Some` exactly
    /// once.
    pub fn take_session_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.session_events_rx.take()
    }

    /// Take the application-packet stream of the underlying session.
    /// Yields `Some` exactly once.
    pub fn take_packets(&mut self) -> Option<mpsc::Receiver<Packet>> {
        self.session.take_packets()
    }
}
