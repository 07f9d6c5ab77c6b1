//! The hub: event dispatch and connection lifecycle.
//!
//! The hub owns every engine component and the collaborator trait objects,
//! and is the only surface the transport layer talks to. Inbound client
//! events are dispatched to the owning component; each handler is its own
//! failure domain, so an error becomes one `error` event to the originating
//! connection and never disturbs shared state.
//!
//! Transport close runs the teardown sequence in order: leave every room,
//! deregister, broadcast offline, tear down calls. Rooms are pruned before
//! the registry entry disappears, so no fan-out can target a connection that
//! has already left its rooms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use huddle_protocol::{ClientEvent, PresenceStatus, ServerEvent};
use tracing::{debug, warn};

use crate::auth::{AuthGate, CredentialVerifier, RejectReason};
use crate::calls::CallSignalRelay;
use crate::error::EngineError;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionRegistry, EventSender};
use crate::rooms::RoomManager;
use crate::router::{AuthorizationOracle, MessageRouter};
use crate::store::MessageStore;
use crate::types::{Identity, IdentityId, MAX_STATUS_LENGTH};
use crate::typing::TypingIndicatorTracker;

/// Engine-wide counters for observability.
#[derive(Debug, Clone, Copy)]
pub struct HubStats {
    /// Live connections.
    pub connections: usize,
    /// Online identities.
    pub identities: usize,
    /// Live rooms.
    pub rooms: usize,
    /// Active call sessions.
    pub calls: usize,
}

/// The engine's composition point.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    presence: Arc<PresenceBroadcaster>,
    typing: Arc<TypingIndicatorTracker>,
    calls: Arc<CallSignalRelay>,
    router: MessageRouter,
    gate: AuthGate,
}

impl Hub {
    /// Assemble the engine over its external collaborators.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        store: Arc<dyn MessageStore>,
        oracle: Arc<dyn AuthorizationOracle>,
        typing_ttl: Duration,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let typing = Arc::new(TypingIndicatorTracker::new(
            typing_ttl,
            rooms.clone(),
            registry.clone(),
        ));
        let calls = Arc::new(CallSignalRelay::new(registry.clone()));
        let router = MessageRouter::new(
            registry.clone(),
            rooms.clone(),
            typing.clone(),
            store,
            oracle,
        );

        Self {
            registry,
            rooms,
            presence,
            typing,
            calls,
            router,
            gate: AuthGate::new(verifier),
        }
    }

    /// Authenticate a handshake credential.
    ///
    /// # Errors
    ///
    /// Returns the reject reason; the transport must close without
    /// registering.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, RejectReason> {
        self.gate.authenticate(credential).await
    }

    /// Register an authenticated connection.
    ///
    /// On the identity's first connection, seeds the presence interest set
    /// from its contacts and broadcasts `userOnline`.
    ///
    /// Returns `true` if this was the identity's first connection.
    pub fn connect(&self, connection_id: &str, identity: &Identity, sender: EventSender) -> bool {
        let first = self.registry.register(connection_id, identity, sender);
        if first {
            self.presence.register_contacts(&identity.id, &identity.contacts);
            self.presence.on_first_connection(identity);
        }
        first
    }

    /// Dispatch one inbound event from an authenticated connection.
    ///
    /// Domain errors are reported to the originating connection as an
    /// `error` event; they never propagate out of the hub.
    pub async fn handle_event(&self, connection_id: &str, event: ClientEvent) {
        let request_id = event.request_id();
        if let Err(err) = self.dispatch(connection_id, event).await {
            warn!(connection = %connection_id, error = %err, "Event handler failed");
            self.registry.send_to_connection(
                connection_id,
                ServerEvent::error(request_id, err.wire_code(), err.to_string()),
            );
        }
    }

    /// Tear down a closed connection as one sequence.
    pub fn disconnect(&self, connection_id: &str) {
        let rooms_left = self.rooms.leave_all(connection_id);
        let Some((identity, last)) = self.registry.deregister(connection_id) else {
            return;
        };

        if last {
            for room in &rooms_left {
                self.typing.stop_typing(room, &identity);
            }
            self.presence.on_last_disconnection(&identity);
            self.calls.on_identity_offline(&identity);
        }

        debug!(connection = %connection_id, identity = %identity, last, "Connection torn down");
    }

    /// Run one typing-expiry sweep. Returns the number of entries expired.
    pub fn sweep_typing(&self, now: Instant) -> usize {
        self.typing.sweep(now)
    }

    /// The sweep interval matching the configured typing TTL.
    #[must_use]
    pub fn typing_sweep_interval(&self) -> Duration {
        // A third of the TTL keeps worst-case staleness well under one TTL.
        self.typing.ttl() / 3
    }

    /// Engine-wide counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.connection_count(),
            identities: self.registry.identity_count(),
            rooms: self.rooms.room_count(),
            calls: self.calls.active_calls(),
        }
    }

    fn identity_for(&self, connection_id: &str) -> Result<IdentityId, EngineError> {
        self.registry
            .identity_of(connection_id)
            .ok_or_else(|| EngineError::UnknownConnection(connection_id.to_string()))
    }

    async fn dispatch(&self, connection_id: &str, event: ClientEvent) -> Result<(), EngineError> {
        match event {
            ClientEvent::Connect { .. } => {
                // The transport completes the handshake before the event
                // loop; a second connect is ignored.
                debug!(connection = %connection_id, "Duplicate connect event");
                Ok(())
            }

            ClientEvent::JoinRoom { id, room } => {
                self.rooms.join(connection_id, &room)?;
                self.link_co_members(connection_id, &room);
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::LeaveRoom { id, room } => {
                self.rooms.leave(connection_id, &room);
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::SendMessage {
                id,
                destination,
                content,
                reply_to,
                attachments,
            } => {
                let outcome = self
                    .router
                    .send_message(connection_id, &destination, &content, reply_to, attachments)
                    .await?;
                // Ack follows fan-out: the sender learns the durable id only
                // after recipients were addressed.
                self.registry.send_to_connection(
                    connection_id,
                    ServerEvent::message_ack(id, outcome.message_id, outcome.timestamp),
                );
                Ok(())
            }

            ClientEvent::EditMessage {
                id,
                message,
                destination,
                content,
            } => {
                let outcome = self
                    .router
                    .edit_message(connection_id, &message, &destination, &content)
                    .await?;
                self.registry.send_to_connection(
                    connection_id,
                    ServerEvent::message_ack(id, outcome.message_id, outcome.timestamp),
                );
                Ok(())
            }

            ClientEvent::DeleteMessage {
                id,
                message,
                destination,
            } => {
                self.router
                    .delete_message(connection_id, &message, &destination)
                    .await?;
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::ReactToMessage {
                id,
                message,
                destination,
                emoji,
            } => {
                self.router
                    .toggle_reaction(connection_id, &message, &destination, &emoji)
                    .await?;
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::Typing { room, is_typing } => {
                let identity = self.identity_for(connection_id)?;
                if !self.rooms.is_member(connection_id, &room) {
                    return Err(EngineError::NotAMember(room));
                }
                if is_typing {
                    self.typing.start_typing(&room, &identity, Instant::now());
                } else {
                    self.typing.stop_typing(&room, &identity);
                }
                Ok(())
            }

            ClientEvent::SetStatus {
                id,
                status,
                custom_message,
            } => {
                let identity = self.identity_for(connection_id)?;
                if custom_message
                    .as_ref()
                    .is_some_and(|m| m.chars().count() > MAX_STATUS_LENGTH)
                {
                    return Err(EngineError::ValidationFailure("Status message too long"));
                }
                if matches!(status, PresenceStatus::Custom) && custom_message.is_none() {
                    return Err(EngineError::ValidationFailure(
                        "Custom status requires a message",
                    ));
                }
                self.presence.set_status(&identity, status, custom_message);
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::InitiateCall { id, target, kind } => {
                let identity = self.identity_for(connection_id)?;
                let name = self
                    .registry
                    .display_name(&identity)
                    .unwrap_or_else(|| identity.clone());
                let call = self.calls.initiate(&identity, &name, &target, kind)?;
                self.registry
                    .send_to_connection(connection_id, ServerEvent::CallAck { id, call });
                Ok(())
            }

            ClientEvent::AcceptCall { id, call } => {
                let identity = self.identity_for(connection_id)?;
                self.calls.accept(&identity, &call)?;
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::RejectCall { id, call } => {
                let identity = self.identity_for(connection_id)?;
                self.calls.reject(&identity, &call)?;
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::EndCall { id, call } => {
                let identity = self.identity_for(connection_id)?;
                self.calls.end(&identity, &call)?;
                self.registry
                    .send_to_connection(connection_id, ServerEvent::ack(id));
                Ok(())
            }

            ClientEvent::RelaySignal {
                call,
                target,
                kind,
                payload,
            } => {
                let identity = self.identity_for(connection_id)?;
                self.calls
                    .relay_signal(&identity, &call, &target, kind, payload)?;
                Ok(())
            }

            ClientEvent::Ping { timestamp } => {
                self.registry
                    .send_to_connection(connection_id, ServerEvent::Pong { timestamp });
                Ok(())
            }
        }
    }

    /// Seed mutual presence interest between a joiner and the identities
    /// already in the room.
    fn link_co_members(&self, connection_id: &str, room: &str) {
        let Some(joiner) = self.registry.identity_of(connection_id) else {
            return;
        };
        for member in self.rooms.members(room) {
            if member == connection_id {
                continue;
            }
            if let Some(other) = self.registry.identity_of(&member) {
                self.presence.link(&joiner, &other);
            }
        }
    }
}
