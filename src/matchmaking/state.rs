//! The matchmaking state machine.
//!
//! All transitions live in [`apply_internal`], a pure function from the
//! current state and one inbound internal packet to a set of events and
//! side-effect requests. The owning [`MatchClient`](super::MatchClient)
//! runs it under a single lock, so state mutation is sequential per
//! packet, in arrival order.

use serde_json::Value;

use crate::wire::{Packet, headers};

use super::update::ParticipantState;

/// Queue, confirmation, and match lifecycle fields.
///
/// Owned exclusively by the state machine; mutated only inside its packet
/// dispatch and the guarded public commands.
#[derive(Debug, Clone, Default)]
pub struct MatchState {
    /// Confirmed present in the matchmaking queue.
    pub in_queue: bool,
    /// A match is currently running.
    pub in_match: bool,
    /// A match proposal is awaiting confirmation.
    pub confirmation_open: bool,
    /// This client already confirmed the open proposal.
    pub client_confirmed: bool,
    /// Identifier of the running match.
    pub current_match_id: Option<String>,
    /// Identifier of the proposed, not yet started match.
    pub pending_match_id: Option<String>,
    /// Identifiers of finished matches, in completion order.
    pub match_history: Vec<String>,
}

impl MatchState {
    fn reset_match_fields(&mut self) {
        self.in_queue = false;
        self.in_match = false;
        self.confirmation_open = false;
        self.client_confirmed = false;
        self.current_match_id = None;
        self.pending_match_id = None;
    }
}

/// Server-issued identity for tagging match-channel traffic.
///
/// Empty outside of a granted channel; reset to empty on teardown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelIdentity {
    /// Per-match ephemeral identifier for this client.
    pub ephemeral_id: String,
    /// Identifier of the match group the channel belongs to.
    pub match_group_id: String,
}

/// Something observable happened in the match lifecycle.
#[derive(Debug)]
pub enum MatchEvent {
    /// The server acknowledged the queue join.
    QueueJoined,
    /// The server acknowledged the queue leave.
    QueueLeft,
    /// A match was proposed; the confirmation window is open.
    ConfirmRequested {
        /// Identifier of the proposed match.
        match_id: String,
    },
    /// The confirmed match started.
    MatchStarted {
        /// Identifier of the started match.
        match_id: String,
    },
    /// The running match finished normally.
    MatchEnded {
        /// Identifier of the finished match.
        match_id: String,
    },
    /// This client left the running match.
    MatchExited,
    /// Another participant left the running match.
    ParticipantExited {
        /// Identifier of the participant that left.
        participant_id: String,
    },
    /// The proposed or running match fell apart.
    MatchDisbanded,
    /// A broadcast from the match group.
    Broadcast(Packet),
    /// Per-participant state fan-out.
    StateUpdate(Vec<ParticipantState>),
    /// A world-level update.
    WorldUpdate(Packet),
    /// An opaque message delivery.
    Message(Packet),
    /// The match datagram channel finished its handshake.
    ChannelConnected,
    /// The match datagram channel closed.
    ChannelClosed,
}

/// Side effect requested by a transition, performed by the owner.
#[derive(Debug, PartialEq)]
pub(super) enum MatchAction {
    /// Construct and connect the match datagram channel.
    SpawnChannel(ChannelIdentity),
    /// Close and discard the match datagram channel.
    TeardownChannel,
}

/// Result of dispatching one internal packet.
#[derive(Debug, Default)]
pub(super) struct DispatchOutcome {
    pub events: Vec<MatchEvent>,
    pub actions: Vec<MatchAction>,
}

impl DispatchOutcome {
    fn event(mut self, event: MatchEvent) -> Self {
        self.events.push(event);
        self
    }

    fn action(mut self, action: MatchAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Apply one inbound internal packet to the state machine.
///
/// `own_identity` is the session identity, used to tell a self-exit from
/// another participant's exit. `channel_active` reports whether a match
/// channel is currently live, so a second channel grant is a no-op.
pub(super) fn apply_internal(
    state: &mut MatchState,
    packet: &Packet,
    own_identity: Option<&str>,
    channel_active: bool,
) -> DispatchOutcome {
    let outcome = DispatchOutcome::default();

    match packet.header() {
        headers::MATCH_SEARCH => {
            state.in_queue = true;
            outcome.event(MatchEvent::QueueJoined)
        }

        headers::MATCH_LEAVE => {
            state.in_queue = false;
            outcome.event(MatchEvent::QueueLeft)
        }

        headers::MATCH_CONFIRM => match packet.content_str("matchId") {
            Some(match_id) => {
                state.pending_match_id = Some(match_id.to_string());
                state.confirmation_open = true;
                state.client_confirmed = false;
                outcome.event(MatchEvent::ConfirmRequested {
                    match_id: match_id.to_string(),
                })
            }
            None => {
                tracing::warn!(%packet, "confirm request without matchId, dropped");
                outcome
            }
        },

        headers::MATCH_START => match state.pending_match_id.take() {
            Some(match_id) => {
                state.current_match_id = Some(match_id.clone());
                state.confirmation_open = false;
                state.client_confirmed = false;
                state.in_queue = false;
                state.in_match = true;
                outcome.event(MatchEvent::MatchStarted { match_id })
            }
            None => {
                tracing::warn!("match start without a pending match, dropped");
                outcome
            }
        },

        headers::MATCH_DISBAND => {
            state.reset_match_fields();
            outcome
                .action(MatchAction::TeardownChannel)
                .event(MatchEvent::MatchDisbanded)
        }

        headers::MATCH_END => match state.current_match_id.take() {
            Some(match_id) => {
                state.match_history.push(match_id.clone());
                state.reset_match_fields();
                outcome
                    .action(MatchAction::TeardownChannel)
                    .event(MatchEvent::MatchEnded { match_id })
            }
            None => {
                tracing::warn!("match end while not in a match, dropped");
                outcome
            }
        },

        headers::MATCH_EXIT => {
            if !state.in_match {
                tracing::warn!("match exit while not in a match, dropped");
                return outcome;
            }
            let leaver = packet.content_str("clientId").map(str::to_string);
            match (leaver, own_identity) {
                (Some(leaver), Some(own)) if leaver == own => {
                    if let Some(match_id) = state.current_match_id.take() {
                        state.match_history.push(match_id);
                    }
                    state.reset_match_fields();
                    outcome
                        .action(MatchAction::TeardownChannel)
                        .event(MatchEvent::MatchExited)
                }
                (Some(leaver), _) => outcome.event(MatchEvent::ParticipantExited {
                    participant_id: leaver,
                }),
                (None, _) => {
                    tracing::warn!(%packet, "match exit without clientId, dropped");
                    outcome
                }
            }
        }

        headers::MATCH_STATE_UPDATE => {
            if !state.in_match {
                tracing::warn!("state update while not in a match, dropped");
                return outcome;
            }
            match parse_states(packet) {
                Some(states) => outcome.event(MatchEvent::StateUpdate(states)),
                None => {
                    tracing::warn!(%packet, "undecodable state update, dropped");
                    outcome
                }
            }
        }

        headers::MATCH_MESSAGE_UPDATE => {
            let identity = packet.content_str("identifier").zip(packet.content_str("groupId"));
            match identity {
                Some((ephemeral_id, match_group_id)) => {
                    if channel_active {
                        tracing::debug!("match channel already running, grant ignored");
                        outcome
                    } else {
                        outcome.action(MatchAction::SpawnChannel(ChannelIdentity {
                            ephemeral_id: ephemeral_id.to_string(),
                            match_group_id: match_group_id.to_string(),
                        }))
                    }
                }
                None => outcome.event(MatchEvent::Message(packet.clone())),
            }
        }

        headers::MATCH_WORLD_UPDATE => outcome.event(MatchEvent::WorldUpdate(packet.clone())),

        headers::MATCH_BROADCAST => outcome.event(MatchEvent::Broadcast(packet.clone())),

        other => {
            tracing::debug!(header = other, "unhandled internal header");
            outcome
        }
    }
}

/// Decode the per-participant records of a state-update packet.
fn parse_states(packet: &Packet) -> Option<Vec<ParticipantState>> {
    let states: &Value = packet.content().get("states")?;
    serde_json::from_value(states.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn internal(header: &str, entries: &[(&str, Value)]) -> Packet {
        let mut content = Map::new();
        for (key, value) in entries {
            content.insert((*key).to_string(), value.clone());
        }
        Packet::internal(header, content)
    }

    fn apply(
        state: &mut MatchState,
        packet: &Packet,
        own: Option<&str>,
        channel_active: bool,
    ) -> DispatchOutcome {
        apply_internal(state, packet, own, channel_active)
    }

    #[test]
    fn test_queue_ack_round_trip() {
        let mut state = MatchState::default();

        let outcome = apply(&mut state, &internal(headers::MATCH_SEARCH, &[]), None, false);
        assert!(state.in_queue);
        assert!(matches!(outcome.events[..], [MatchEvent::QueueJoined]));

        let outcome = apply(&mut state, &internal(headers::MATCH_LEAVE, &[]), None, false);
        assert!(!state.in_queue);
        assert!(matches!(outcome.events[..], [MatchEvent::QueueLeft]));
    }

    #[test]
    fn test_full_match_lifecycle() {
        let mut state = MatchState::default();

        apply(&mut state, &internal(headers::MATCH_SEARCH, &[]), None, false);
        assert!(state.in_queue);

        let confirm = internal(headers::MATCH_CONFIRM, &[("matchId", json!("m1"))]);
        let outcome = apply(&mut state, &confirm, None, false);
        assert!(state.confirmation_open);
        assert!(!state.client_confirmed);
        assert_eq!(state.pending_match_id.as_deref(), Some("m1"));
        assert!(matches!(
            outcome.events[..],
            [MatchEvent::ConfirmRequested { ref match_id }] if match_id == "m1"
        ));

        let outcome = apply(&mut state, &internal(headers::MATCH_START, &[]), None, false);
        assert!(state.in_match);
        assert!(!state.in_queue);
        assert!(!state.confirmation_open);
        assert_eq!(state.current_match_id.as_deref(), Some("m1"));
        assert_eq!(state.pending_match_id, None);
        assert!(matches!(
            outcome.events[..],
            [MatchEvent::MatchStarted { ref match_id }] if match_id == "m1"
        ));

        let outcome = apply(&mut state, &internal(headers::MATCH_END, &[]), None, false);
        assert!(!state.in_match);
        assert_eq!(state.current_match_id, None);
        assert_eq!(state.match_history, vec!["m1"]);
        assert!(outcome.actions.contains(&MatchAction::TeardownChannel));
        assert!(matches!(
            outcome.events[..],
            [MatchEvent::MatchEnded { ref match_id }] if match_id == "m1"
        ));
    }

    #[test]
    fn test_disband_resets_and_tears_down() {
        let mut state = MatchState {
            in_queue: true,
            confirmation_open: true,
            client_confirmed: true,
            pending_match_id: Some("m2".to_string()),
            ..MatchState::default()
        };

        let outcome = apply(&mut state, &internal(headers::MATCH_DISBAND, &[]), None, false);
        assert!(!state.in_queue);
        assert!(!state.confirmation_open);
        assert!(!state.client_confirmed);
        assert_eq!(state.pending_match_id, None);
        assert!(outcome.actions.contains(&MatchAction::TeardownChannel));
        assert!(matches!(outcome.events[..], [MatchEvent::MatchDisbanded]));
    }

    #[test]
    fn test_self_exit_vs_other_exit() {
        let mut state = MatchState {
            in_match: true,
            current_match_id: Some("m3".to_string()),
            ..MatchState::default()
        };

        // Another participant leaving only fires an event.
        let other = internal(headers::MATCH_EXIT, &[("clientId", json!("them"))]);
        let outcome = apply(&mut state, &other, Some("me"), true);
        assert!(state.in_match);
        assert_eq!(state.current_match_id.as_deref(), Some("m3"));
        assert!(outcome.actions.is_empty());
        assert!(matches!(
            outcome.events[..],
            [MatchEvent::ParticipantExited { ref participant_id }] if participant_id == "them"
        ));

        // Our own exit clears the match and tears the channel down.
        let own = internal(headers::MATCH_EXIT, &[("clientId", json!("me"))]);
        let outcome = apply(&mut state, &own, Some("me"), true);
        assert!(!state.in_match);
        assert_eq!(state.match_history, vec!["m3"]);
        assert!(outcome.actions.contains(&MatchAction::TeardownChannel));
        assert!(matches!(outcome.events[..], [MatchEvent::MatchExited]));
    }

    #[test]
    fn test_exit_outside_match_dropped() {
        let mut state = MatchState::default();
        let packet = internal(headers::MATCH_EXIT, &[("clientId", json!("me"))]);
        let outcome = apply(&mut state, &packet, Some("me"), false);
        assert!(outcome.events.is_empty());
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn test_state_update_only_in_match() {
        let record = json!({
            "position": {"x": 1.0, "y": 2.0, "z": 3.0},
            "rotation": {"x": 0.0, "y": 0.0, "z": 0.0},
            "animations": ["run"],
            "clientId": "u1"
        });
        let packet = internal(headers::MATCH_STATE_UPDATE, &[("states", json!([record]))]);

        let mut state = MatchState::default();
        let outcome = apply(&mut state, &packet, None, false);
        assert!(outcome.events.is_empty(), "dropped outside a match");

        state.in_match = true;
        let outcome = apply(&mut state, &packet, None, false);
        match &outcome.events[..] {
            [MatchEvent::StateUpdate(states)] => {
                assert_eq!(states.len(), 1);
                assert_eq!(states[0].client_id, "u1");
                assert_eq!(states[0].position.x, 1.0);
            }
            other => panic!("expected StateUpdate, got {other:?}"),
        }
    }

    #[test]
    fn test_state_update_decode_failure_dropped() {
        let mut state = MatchState {
            in_match: true,
            ..MatchState::default()
        };
        let packet = internal(headers::MATCH_STATE_UPDATE, &[("states", json!("not a list"))]);
        let outcome = apply(&mut state, &packet, None, false);
        assert!(outcome.events.is_empty());
        assert!(state.in_match, "state unchanged on decode failure");
    }

    #[test]
    fn test_channel_grant_spawns_once() {
        let mut state = MatchState::default();
        let grant = internal(
            headers::MATCH_MESSAGE_UPDATE,
            &[("identifier", json!("u1")), ("groupId", json!("g1"))],
        );

        let outcome = apply(&mut state, &grant, None, false);
        assert_eq!(
            outcome.actions,
            vec![MatchAction::SpawnChannel(ChannelIdentity {
                ephemeral_id: "u1".to_string(),
                match_group_id: "g1".to_string(),
            })]
        );

        // A second grant while a channel is live is a no-op.
        let outcome = apply(&mut state, &grant, None, true);
        assert!(outcome.actions.is_empty());
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_plain_message_update_is_event() {
        let mut state = MatchState::default();
        let message = internal(headers::MATCH_MESSAGE_UPDATE, &[("text", json!("hello"))]);
        let outcome = apply(&mut state, &message, None, false);
        assert!(matches!(outcome.events[..], [MatchEvent::Message(_)]));
        assert!(outcome.actions.is_empty());
    }
}
