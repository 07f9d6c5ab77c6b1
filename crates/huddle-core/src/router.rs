//! Message routing: resolve, authorize, persist, fan out, acknowledge.
//!
//! Every chat operation follows the same shape. The sender's identity comes
//! from the registry, the destination is checked against room membership (or
//! the authorization oracle for direct messages), the store assigns the
//! durable id and timestamp, and only then does anything reach other
//! connections. A persistence failure therefore means zero fan-out:
//! recipients never see content the sender cannot later retrieve.
//!
//! No component lock is held across the store or oracle awaits; per-sender
//! ordering into a room follows from awaiting persistence before fan-out
//! inside the connection's sequential event loop.

use std::sync::Arc;

use async_trait::async_trait;
use huddle_protocol::{ChatMessage, Destination, ServerEvent};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomManager;
use crate::store::{MessageStore, NewMessage, ReactionChange, StoreError};
use crate::types::{direct_room_id, IdentityId, MessageId, RoomId, MAX_CONTENT_LENGTH};
use crate::typing::TypingIndicatorTracker;

/// External collaborator answering "may this identity message that one?".
#[async_trait]
pub trait AuthorizationOracle: Send + Sync {
    /// Whether `sender` may open a direct conversation with `recipient`.
    async fn allow_direct(&self, sender: &str, recipient: &str) -> bool;
}

/// An oracle that allows every direct message. Deployments restrict this by
/// implementing the trait against their own relationship data.
pub struct OpenOracle;

#[async_trait]
impl AuthorizationOracle for OpenOracle {
    async fn allow_direct(&self, _sender: &str, _recipient: &str) -> bool {
        true
    }
}

/// Result of a successful send or edit.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Durable message id.
    pub message_id: MessageId,
    /// Store-assigned timestamp in Unix milliseconds.
    pub timestamp: u64,
    /// Connections the event was fanned out to.
    pub recipients: usize,
}

/// Where a resolved operation fans out to.
enum Fanout {
    /// Every other connection in the room.
    Room(RoomId),
    /// The recipient's connections.
    Direct { room: RoomId, recipient: IdentityId },
}

impl Fanout {
    fn room(&self) -> &RoomId {
        match self {
            Fanout::Room(room) | Fanout::Direct { room, .. } => room,
        }
    }
}

/// Resolves destinations, persists through the store, and fans out.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    typing: Arc<TypingIndicatorTracker>,
    store: Arc<dyn MessageStore>,
    oracle: Arc<dyn AuthorizationOracle>,
}

impl MessageRouter {
    /// Create a router over the given components and collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        typing: Arc<TypingIndicatorTracker>,
        store: Arc<dyn MessageStore>,
        oracle: Arc<dyn AuthorizationOracle>,
    ) -> Self {
        Self {
            registry,
            rooms,
            typing,
            store,
            oracle,
        }
    }

    /// Send a new message.
    ///
    /// # Errors
    ///
    /// `NotAMember` / `AuthorizationDenied` for a destination the sender may
    /// not reach, `ValidationFailure` for bad content, `PersistenceFailure`
    /// when the store rejects the write (no fan-out happens).
    pub async fn send_message(
        &self,
        sender_connection: &str,
        destination: &Destination,
        content: &str,
        reply_to: Option<MessageId>,
        attachments: Vec<String>,
    ) -> Result<SendOutcome, EngineError> {
        let (sender, fanout) = self.resolve(sender_connection, destination).await?;
        validate_content(content)?;

        let room = fanout.room().clone();
        let author_name = self
            .registry
            .display_name(&sender)
            .unwrap_or_else(|| sender.clone());

        let stored = self
            .store
            .persist(NewMessage {
                room: room.clone(),
                author: sender.clone(),
                content: content.to_string(),
                reply_to: reply_to.clone(),
                attachments: attachments.clone(),
            })
            .await
            .map_err(|e| {
                warn!(room = %room, error = %e, "Message persist failed");
                EngineError::PersistenceFailure(e.to_string())
            })?;

        let event = ServerEvent::MessageCreated {
            message: ChatMessage {
                id: stored.id.clone(),
                room: room.clone(),
                author: sender.clone(),
                author_name,
                content: content.to_string(),
                reply_to,
                attachments,
                timestamp: stored.timestamp,
            },
        };
        let recipients = self.fan_out(sender_connection, &fanout, &event);

        // A delivered message ends the sender's typing state in that room.
        self.typing.stop_typing(&room, &sender);

        debug!(
            room = %room,
            message = %stored.id,
            recipients,
            "Message fanned out"
        );
        Ok(SendOutcome {
            message_id: stored.id,
            timestamp: stored.timestamp,
            recipients,
        })
    }

    /// Edit a previously sent message.
    ///
    /// # Errors
    ///
    /// Same taxonomy as `send_message`; editing someone else's message is
    /// `AuthorizationDenied`.
    pub async fn edit_message(
        &self,
        sender_connection: &str,
        message_id: &str,
        destination: &Destination,
        content: &str,
    ) -> Result<SendOutcome, EngineError> {
        let (sender, fanout) = self.resolve(sender_connection, destination).await?;
        validate_content(content)?;

        let stored = self
            .store
            .update(message_id, &sender, content)
            .await
            .map_err(map_store_error)?;

        let event = ServerEvent::MessageUpdated {
            room: fanout.room().clone(),
            message: stored.id.clone(),
            content: content.to_string(),
            timestamp: stored.timestamp,
        };
        let recipients = self.fan_out(sender_connection, &fanout, &event);

        Ok(SendOutcome {
            message_id: stored.id,
            timestamp: stored.timestamp,
            recipients,
        })
    }

    /// Delete a previously sent message. Fans out the id only, never content.
    ///
    /// # Errors
    ///
    /// Same taxonomy as `edit_message`.
    pub async fn delete_message(
        &self,
        sender_connection: &str,
        message_id: &str,
        destination: &Destination,
    ) -> Result<(), EngineError> {
        let (sender, fanout) = self.resolve(sender_connection, destination).await?;

        self.store
            .delete(message_id, &sender)
            .await
            .map_err(map_store_error)?;

        let event = ServerEvent::MessageDeleted {
            room: fanout.room().clone(),
            message: message_id.to_string(),
        };
        self.fan_out(sender_connection, &fanout, &event);
        Ok(())
    }

    /// Toggle the sender's reaction on a message.
    ///
    /// The store performs the toggle atomically; concurrent identical
    /// toggles from two devices serialize into add-then-remove.
    ///
    /// # Errors
    ///
    /// Same taxonomy as `edit_message`.
    pub async fn toggle_reaction(
        &self,
        sender_connection: &str,
        message_id: &str,
        destination: &Destination,
        emoji: &str,
    ) -> Result<ReactionChange, EngineError> {
        let (sender, fanout) = self.resolve(sender_connection, destination).await?;
        if emoji.is_empty() || emoji.chars().count() > 64 {
            return Err(EngineError::ValidationFailure("Invalid reaction emoji"));
        }

        let change = self
            .store
            .toggle_reaction(message_id, emoji, &sender)
            .await
            .map_err(map_store_error)?;

        let event = ServerEvent::MessageReaction {
            room: fanout.room().clone(),
            message: message_id.to_string(),
            emoji: emoji.to_string(),
            identity: sender,
            added: change.added,
        };
        self.fan_out(sender_connection, &fanout, &event);
        Ok(change)
    }

    /// Resolve the sender identity and the fan-out target for a destination.
    async fn resolve(
        &self,
        sender_connection: &str,
        destination: &Destination,
    ) -> Result<(IdentityId, Fanout), EngineError> {
        let sender = self
            .registry
            .identity_of(sender_connection)
            .ok_or_else(|| EngineError::UnknownConnection(sender_connection.to_string()))?;

        match destination {
            Destination::Room { room } => {
                if !self.rooms.is_member(sender_connection, room) {
                    return Err(EngineError::NotAMember(room.clone()));
                }
                Ok((sender, Fanout::Room(room.clone())))
            }
            Destination::Direct { identity } => {
                if !self.oracle.allow_direct(&sender, identity).await {
                    return Err(EngineError::AuthorizationDenied);
                }
                let room = direct_room_id(&sender, identity);
                Ok((
                    sender,
                    Fanout::Direct {
                        room,
                        recipient: identity.clone(),
                    },
                ))
            }
        }
    }

    /// Deliver to everyone but the sending connection.
    fn fan_out(&self, sender_connection: &str, fanout: &Fanout, event: &ServerEvent) -> usize {
        match fanout {
            Fanout::Room(room) => {
                let members = self.rooms.members(room);
                let targets = members
                    .iter()
                    .filter(|c| c.as_str() != sender_connection);
                self.registry.send_to_connections(targets, event)
            }
            Fanout::Direct { recipient, .. } => self.registry.send_to_identity(recipient, event),
        }
    }
}

fn validate_content(content: &str) -> Result<(), EngineError> {
    if content.trim().is_empty() {
        return Err(EngineError::ValidationFailure("Message content is empty"));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(EngineError::ValidationFailure("Message content too long"));
    }
    Ok(())
}

fn map_store_error(error: StoreError) -> EngineError {
    match error {
        StoreError::NotFound(_) => EngineError::ValidationFailure("Unknown message"),
        StoreError::Forbidden(_) => EngineError::AuthorizationDenied,
        StoreError::Unavailable(msg) => EngineError::PersistenceFailure(msg),
    }
}
