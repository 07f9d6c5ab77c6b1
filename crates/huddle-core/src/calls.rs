//! Call sessions and signaling relay.
//!
//! The relay never inspects negotiation payloads: offers, answers, ICE
//! candidates, and screen-share blobs pass through untouched. The only state
//! kept per call is who participates, so teardown can notify the remaining
//! side when a peer hangs up or drops.

use std::collections::HashSet;

use dashmap::DashMap;
use huddle_protocol::{CallKind, ServerEvent, SignalKind};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::registry::ConnectionRegistry;
use crate::types::{unix_timestamp_ms, CallId, IdentityId};

/// An active call between identities.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Session identifier.
    pub call_id: CallId,
    /// Identities in the call.
    pub participants: HashSet<IdentityId>,
    /// Voice or video.
    pub kind: CallKind,
    /// Whether the callee has accepted.
    pub accepted: bool,
    /// Creation timestamp in Unix milliseconds.
    pub started_at: u64,
}

/// Relays opaque call-negotiation payloads and tracks sessions for teardown.
pub struct CallSignalRelay {
    registry: Arc<ConnectionRegistry>,
    sessions: DashMap<CallId, CallSession>,
}

impl CallSignalRelay {
    /// Create a relay delivering through the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
        }
    }

    /// Start a call from `caller` to `target`.
    ///
    /// # Errors
    ///
    /// Returns `DestinationUnavailable` if the target has no live connection;
    /// no session is created in that case.
    pub fn initiate(
        &self,
        caller: &str,
        caller_name: &str,
        target: &str,
        kind: CallKind,
    ) -> Result<CallId, EngineError> {
        if !self.registry.is_online(target) {
            return Err(EngineError::DestinationUnavailable(target.to_string()));
        }

        let call_id = Uuid::new_v4().to_string();
        let mut participants = HashSet::new();
        participants.insert(caller.to_string());
        participants.insert(target.to_string());

        self.sessions.insert(
            call_id.clone(),
            CallSession {
                call_id: call_id.clone(),
                participants,
                kind,
                accepted: false,
                started_at: unix_timestamp_ms(),
            },
        );

        self.registry.send_to_identity(
            target,
            &ServerEvent::IncomingCall {
                call: call_id.clone(),
                from: caller.to_string(),
                from_name: caller_name.to_string(),
                kind,
            },
        );

        info!(call = %call_id, caller = %caller, target = %target, ?kind, "Call initiated");
        Ok(call_id)
    }

    /// Accept an incoming call.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCall` if the session does not exist or the accepter is
    /// not a participant.
    pub fn accept(&self, identity: &str, call_id: &str) -> Result<(), EngineError> {
        let others = {
            let mut session = self
                .sessions
                .get_mut(call_id)
                .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;
            if !session.participants.contains(identity) {
                return Err(EngineError::UnknownCall(call_id.to_string()));
            }
            session.accepted = true;
            other_participants(&session, identity)
        };

        self.notify(
            &others,
            &ServerEvent::CallAccepted {
                call: call_id.to_string(),
                identity: identity.to_string(),
            },
        );
        debug!(call = %call_id, identity = %identity, "Call accepted");
        Ok(())
    }

    /// Reject an incoming call and drop the session.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCall` if the session does not exist or the rejecter is
    /// not a participant.
    pub fn reject(&self, identity: &str, call_id: &str) -> Result<(), EngineError> {
        let (_, session) = self
            .sessions
            .remove_if(call_id, |_, session| session.participants.contains(identity))
            .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;

        self.notify(
            &other_participants(&session, identity),
            &ServerEvent::CallRejected {
                call: call_id.to_string(),
                identity: identity.to_string(),
            },
        );
        debug!(call = %call_id, identity = %identity, "Call rejected");
        Ok(())
    }

    /// Pass a negotiation payload through to the target's connections.
    ///
    /// The payload is never inspected. Returns the number of connections
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCall` if the session does not exist, or
    /// `AuthorizationDenied` if sender or target is not a participant.
    pub fn relay_signal(
        &self,
        from: &str,
        call_id: &str,
        target: &str,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<usize, EngineError> {
        {
            let session = self
                .sessions
                .get(call_id)
                .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;
            if !session.participants.contains(from) || !session.participants.contains(target) {
                return Err(EngineError::AuthorizationDenied);
            }
        }

        let delivered = self
            .registry
            .send_to_identity(target, &ServerEvent::signal(kind, call_id, from, payload));
        if delivered == 0 {
            warn!(call = %call_id, target = %target, "Signal relayed to offline target");
        }
        Ok(delivered)
    }

    /// Hang up a call and drop the session.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCall` if the session does not exist or the caller is
    /// not a participant.
    pub fn end(&self, identity: &str, call_id: &str) -> Result<(), EngineError> {
        let (_, session) = self
            .sessions
            .remove_if(call_id, |_, session| session.participants.contains(identity))
            .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;

        self.notify(
            &other_participants(&session, identity),
            &ServerEvent::CallEnded {
                call: call_id.to_string(),
                identity: Some(identity.to_string()),
            },
        );
        info!(call = %call_id, identity = %identity, "Call ended");
        Ok(())
    }

    /// Tear down sessions for an identity whose last connection dropped.
    ///
    /// The identity leaves every session it participates in; any session left
    /// with fewer than two participants is removed and the remaining
    /// participants receive `callEnded`.
    ///
    /// Returns the ids of the sessions that were torn down.
    pub fn on_identity_offline(&self, identity: &str) -> Vec<CallId> {
        let affected: Vec<CallId> = self
            .sessions
            .iter()
            .filter(|entry| entry.participants.contains(identity))
            .map(|entry| entry.key().clone())
            .collect();

        let mut torn_down = Vec::new();
        for call_id in affected {
            let remaining = {
                let Some(mut session) = self.sessions.get_mut(&call_id) else {
                    continue;
                };
                session.participants.remove(identity);
                if session.participants.len() >= 2 {
                    continue;
                }
                session.participants.iter().cloned().collect::<Vec<_>>()
            };

            self.sessions.remove(&call_id);
            self.notify(
                &remaining,
                &ServerEvent::CallEnded {
                    call: call_id.clone(),
                    identity: None,
                },
            );
            info!(call = %call_id, identity = %identity, "Call torn down on disconnect");
            torn_down.push(call_id);
        }
        torn_down
    }

    /// Look up a session snapshot.
    #[must_use]
    pub fn session(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    /// Number of active call sessions.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }

    fn notify(&self, identities: &[IdentityId], event: &ServerEvent) {
        for identity in identities {
            self.registry.send_to_identity(identity, event);
        }
    }
}

fn other_participants(session: &CallSession, except: &str) -> Vec<IdentityId> {
    session
        .participants
        .iter()
        .filter(|p| p.as_str() != except)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use tokio::sync::mpsc;

    fn online(
        registry: &Arc<ConnectionRegistry>,
        id: &str,
        conn: &str,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, &Identity::new(id, id.to_uppercase()), tx);
        rx
    }

    fn fixture() -> (CallSignalRelay, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = CallSignalRelay::new(registry.clone());
        (relay, registry)
    }

    #[test]
    fn test_initiate_to_offline_target_fails() {
        let (relay, registry) = fixture();
        let _u1_rx = online(&registry, "u1", "c1");

        let result = relay.initiate("u1", "U1", "u3", CallKind::Video);
        assert!(matches!(
            result,
            Err(EngineError::DestinationUnavailable(target)) if target == "u3"
        ));
        assert_eq!(relay.active_calls(), 0);
    }

    #[test]
    fn test_initiate_rings_all_target_connections() {
        let (relay, registry) = fixture();
        let _u1_rx = online(&registry, "u1", "c1");
        let mut phone_rx = online(&registry, "u2", "c2-phone");
        let mut desk_rx = online(&registry, "u2", "c2-desk");

        let call_id = relay.initiate("u1", "U1", "u2", CallKind::Voice).unwrap();
        assert_eq!(relay.active_calls(), 1);

        for rx in [&mut phone_rx, &mut desk_rx] {
            match rx.try_recv() {
                Ok(ServerEvent::IncomingCall { call, from, .. }) => {
                    assert_eq!(call, call_id);
                    assert_eq!(from, "u1");
                }
                other => panic!("Expected IncomingCall, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_accept_and_end_notify_peer() {
        let (relay, registry) = fixture();
        let mut u1_rx = online(&registry, "u1", "c1");
        let mut u2_rx = online(&registry, "u2", "c2");

        let call_id = relay.initiate("u1", "U1", "u2", CallKind::Video).unwrap();
        let _ = u2_rx.try_recv();

        relay.accept("u2", &call_id).unwrap();
        assert!(matches!(u1_rx.try_recv(), Ok(ServerEvent::CallAccepted { .. })));
        assert!(relay.session(&call_id).unwrap().accepted);

        relay.end("u1", &call_id).unwrap();
        assert!(matches!(
            u2_rx.try_recv(),
            Ok(ServerEvent::CallEnded { identity: Some(id), .. }) if id == "u1"
        ));
        assert_eq!(relay.active_calls(), 0);
    }

    #[test]
    fn test_reject_drops_session() {
        let (relay, registry) = fixture();
        let mut u1_rx = online(&registry, "u1", "c1");
        let _u2_rx = online(&registry, "u2", "c2");

        let call_id = relay.initiate("u1", "U1", "u2", CallKind::Voice).unwrap();
        relay.reject("u2", &call_id).unwrap();

        assert!(matches!(u1_rx.try_recv(), Ok(ServerEvent::CallRejected { .. })));
        assert_eq!(relay.active_calls(), 0);
        assert!(matches!(
            relay.accept("u2", &call_id),
            Err(EngineError::UnknownCall(_))
        ));
    }

    #[test]
    fn test_relay_signal_is_opaque_pass_through() {
        let (relay, registry) = fixture();
        let _u1_rx = online(&registry, "u1", "c1");
        let mut u2_rx = online(&registry, "u2", "c2");

        let call_id = relay.initiate("u1", "U1", "u2", CallKind::Video).unwrap();
        let _ = u2_rx.try_recv();

        let payload = serde_json::json!({"sdp": "v=0", "junk": [1, 2, 3]});
        let delivered = relay
            .relay_signal("u1", &call_id, "u2", SignalKind::Offer, payload.clone())
            .unwrap();
        assert_eq!(delivered, 1);

        match u2_rx.try_recv() {
            Ok(ServerEvent::SignalOffer { call, from, payload: got }) => {
                assert_eq!(call, call_id);
                assert_eq!(from, "u1");
                assert_eq!(got, payload);
            }
            other => panic!("Expected SignalOffer, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_signal_requires_participants() {
        let (relay, registry) = fixture();
        let _u1_rx = online(&registry, "u1", "c1");
        let _u2_rx = online(&registry, "u2", "c2");
        let _u3_rx = online(&registry, "u3", "c3");

        let call_id = relay.initiate("u1", "U1", "u2", CallKind::Voice).unwrap();

        assert!(matches!(
            relay.relay_signal("u3", &call_id, "u2", SignalKind::Answer, serde_json::json!({})),
            Err(EngineError::AuthorizationDenied)
        ));
        assert!(matches!(
            relay.relay_signal("u1", "nope", "u2", SignalKind::Answer, serde_json::json!({})),
            Err(EngineError::UnknownCall(_))
        ));
    }

    #[test]
    fn test_disconnect_tears_down_session() {
        let (relay, registry) = fixture();
        let _u1_rx = online(&registry, "u1", "c1");
        let mut u2_rx = online(&registry, "u2", "c2");

        let call_id = relay.initiate("u1", "U1", "u2", CallKind::Voice).unwrap();
        let _ = u2_rx.try_recv();

        let torn_down = relay.on_identity_offline("u1");
        assert_eq!(torn_down, vec![call_id]);
        assert_eq!(relay.active_calls(), 0);
        assert!(matches!(
            u2_rx.try_recv(),
            Ok(ServerEvent::CallEnded { identity: None, .. })
        ));
    }
}
