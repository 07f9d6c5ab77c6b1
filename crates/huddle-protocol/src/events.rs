//! Event types for the huddle protocol.
//!
//! Events are the fundamental unit of communication. Each event is serialized
//! using MessagePack with a `type` tag, so the same contract can be inspected
//! as JSON during debugging without changing field names.

use serde::{Deserialize, Serialize};

/// Where a chat operation is aimed: a joined room or another identity.
///
/// Direct destinations are resolved server-side into a deterministic
/// direct-pair room, so clients never have to create one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Destination {
    /// A room the sender has joined.
    Room {
        /// Room identifier.
        room: String,
    },
    /// A direct message to a single identity.
    Direct {
        /// Recipient identity.
        identity: String,
    },
}

impl Destination {
    /// Create a room destination.
    #[must_use]
    pub fn room(room: impl Into<String>) -> Self {
        Destination::Room { room: room.into() }
    }

    /// Create a direct destination.
    #[must_use]
    pub fn direct(identity: impl Into<String>) -> Self {
        Destination::Direct {
            identity: identity.into(),
        }
    }
}

/// Presence status values an identity can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
    Custom,
}

/// Kind of call being negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

/// Kind of signaling payload being relayed between call peers.
///
/// The server never inspects the payload itself; the kind only selects which
/// outbound event carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    ScreenShare,
}

/// Error codes carried on `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    /// Unexpected internal failure.
    Internal = 4000,
    /// Credential was missing, invalid, or expired at handshake.
    HandshakeRejected = 4001,
    /// Sender lacks permission for the target.
    AuthorizationDenied = 4003,
    /// Call target has no live connection.
    DestinationUnavailable = 4004,
    /// The persistence collaborator rejected or timed out.
    PersistenceFailure = 4005,
    /// Malformed or out-of-bounds payload.
    ValidationFailure = 4006,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = &'static str;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            4000 => Ok(ErrorCode::Internal),
            4001 => Ok(ErrorCode::HandshakeRejected),
            4003 => Ok(ErrorCode::AuthorizationDenied),
            4004 => Ok(ErrorCode::DestinationUnavailable),
            4005 => Ok(ErrorCode::PersistenceFailure),
            4006 => Ok(ErrorCode::ValidationFailure),
            _ => Err("Unknown error code"),
        }
    }
}

/// A chat message as delivered to clients.
///
/// `id` and `timestamp` are assigned by the persistence collaborator, never
/// by the relay, so a delivered message is always retrievable later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Durable message identifier.
    pub id: String,
    /// Room the message belongs to.
    pub room: String,
    /// Author identity.
    pub author: String,
    /// Author display name at send time.
    #[serde(rename = "authorName")]
    pub author_name: String,
    /// Message body.
    pub content: String,
    /// Message this one replies to, if any.
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Attachment references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Persistence timestamp in Unix milliseconds.
    pub timestamp: u64,
}

/// Events a client sends to the server.
///
/// `id` fields are client-chosen request correlation ids, echoed back on the
/// matching `ack` / `messageAck` / `callAck` / `error`. Fire-and-forget
/// events (`typing`, `relaySignal`) carry no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Handshake. Must be the first event on every connection.
    #[serde(rename = "connect")]
    Connect {
        /// Bearer credential.
        #[serde(skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },

    /// Join a room, creating it if absent.
    #[serde(rename = "joinRoom")]
    JoinRoom { id: u64, room: String },

    /// Leave a room.
    #[serde(rename = "leaveRoom")]
    LeaveRoom { id: u64, room: String },

    /// Send a chat message to a room or directly to an identity.
    #[serde(rename = "sendMessage")]
    SendMessage {
        id: u64,
        destination: Destination,
        content: String,
        #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },

    /// Replace the content of a previously sent message.
    #[serde(rename = "editMessage")]
    EditMessage {
        id: u64,
        message: String,
        destination: Destination,
        content: String,
    },

    /// Delete a previously sent message.
    #[serde(rename = "deleteMessage")]
    DeleteMessage {
        id: u64,
        message: String,
        destination: Destination,
    },

    /// Toggle a reaction on a message.
    #[serde(rename = "reactToMessage")]
    ReactToMessage {
        id: u64,
        message: String,
        destination: Destination,
        emoji: String,
    },

    /// Typing indicator. Fire-and-forget.
    #[serde(rename = "typing")]
    Typing {
        room: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// Explicit presence status change.
    #[serde(rename = "setStatus")]
    SetStatus {
        id: u64,
        status: PresenceStatus,
        #[serde(rename = "customMessage", skip_serializing_if = "Option::is_none")]
        custom_message: Option<String>,
    },

    /// Start a call with another identity.
    #[serde(rename = "initiateCall")]
    InitiateCall {
        id: u64,
        target: String,
        kind: CallKind,
    },

    /// Accept an incoming call.
    #[serde(rename = "acceptCall")]
    AcceptCall { id: u64, call: String },

    /// Reject an incoming call.
    #[serde(rename = "rejectCall")]
    RejectCall { id: u64, call: String },

    /// Hang up a call.
    #[serde(rename = "endCall")]
    EndCall { id: u64, call: String },

    /// Relay an opaque negotiation payload to the other call peer.
    /// Fire-and-forget.
    #[serde(rename = "relaySignal")]
    RelaySignal {
        call: String,
        target: String,
        kind: SignalKind,
        payload: serde_json::Value,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// The request correlation id, or 0 for fire-and-forget events.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        match self {
            ClientEvent::JoinRoom { id, .. }
            | ClientEvent::LeaveRoom { id, .. }
            | ClientEvent::SendMessage { id, .. }
            | ClientEvent::EditMessage { id, .. }
            | ClientEvent::DeleteMessage { id, .. }
            | ClientEvent::ReactToMessage { id, .. }
            | ClientEvent::SetStatus { id, .. }
            | ClientEvent::InitiateCall { id, .. }
            | ClientEvent::AcceptCall { id, .. }
            | ClientEvent::RejectCall { id, .. }
            | ClientEvent::EndCall { id, .. } => *id,
            ClientEvent::Connect { .. }
            | ClientEvent::Typing { .. }
            | ClientEvent::RelaySignal { .. }
            | ClientEvent::Ping { .. } => 0,
        }
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Handshake accepted.
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
        /// Authenticated identity.
        identity: String,
        /// Server protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Plain acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack { id: u64 },

    /// Acknowledgment of a message operation, carrying the durable id.
    #[serde(rename = "messageAck")]
    MessageAck {
        id: u64,
        message: String,
        timestamp: u64,
    },

    /// Acknowledgment of a call initiation, carrying the session id.
    #[serde(rename = "callAck")]
    CallAck { id: u64, call: String },

    /// Request failed. `id` is 0 when the error is not tied to a request.
    #[serde(rename = "error")]
    Error {
        id: u64,
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },

    /// A new message was persisted and fanned out.
    #[serde(rename = "messageCreated")]
    MessageCreated { message: ChatMessage },

    /// A message was edited. Carries the replacement content and edit
    /// timestamp; clients patch by id.
    #[serde(rename = "messageUpdated")]
    MessageUpdated {
        room: String,
        message: String,
        content: String,
        timestamp: u64,
    },

    /// A message was deleted. Carries ids only, never content.
    #[serde(rename = "messageDeleted")]
    MessageDeleted { room: String, message: String },

    /// A reaction was added to or removed from a message.
    #[serde(rename = "messageReaction")]
    MessageReaction {
        room: String,
        message: String,
        emoji: String,
        identity: String,
        added: bool,
    },

    /// An identity came online.
    #[serde(rename = "userOnline")]
    UserOnline { identity: String, name: String },

    /// An identity went offline.
    #[serde(rename = "userOffline")]
    UserOffline {
        identity: String,
        #[serde(rename = "lastSeen")]
        last_seen: u64,
    },

    /// An identity changed its presence status.
    #[serde(rename = "userStatusChanged")]
    UserStatusChanged {
        identity: String,
        status: PresenceStatus,
        #[serde(rename = "customMessage", skip_serializing_if = "Option::is_none")]
        custom_message: Option<String>,
    },

    /// An identity started typing in a room.
    #[serde(rename = "userTyping")]
    UserTyping {
        room: String,
        identity: String,
        name: String,
    },

    /// An identity stopped typing in a room.
    #[serde(rename = "userStoppedTyping")]
    UserStoppedTyping { room: String, identity: String },

    /// An incoming call for one of the receiver's identities.
    #[serde(rename = "incomingCall")]
    IncomingCall {
        call: String,
        from: String,
        #[serde(rename = "fromName")]
        from_name: String,
        kind: CallKind,
    },

    /// The callee accepted.
    #[serde(rename = "callAccepted")]
    CallAccepted { call: String, identity: String },

    /// The callee rejected.
    #[serde(rename = "callRejected")]
    CallRejected { call: String, identity: String },

    /// The call ended. `identity` is absent when teardown was automatic.
    #[serde(rename = "callEnded")]
    CallEnded {
        call: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
    },

    /// Relayed session description offer.
    #[serde(rename = "signalOffer")]
    SignalOffer {
        call: String,
        from: String,
        payload: serde_json::Value,
    },

    /// Relayed session description answer.
    #[serde(rename = "signalAnswer")]
    SignalAnswer {
        call: String,
        from: String,
        payload: serde_json::Value,
    },

    /// Relayed ICE candidate.
    #[serde(rename = "signalIceCandidate")]
    SignalIceCandidate {
        call: String,
        from: String,
        payload: serde_json::Value,
    },

    /// Relayed screen-share negotiation payload.
    #[serde(rename = "signalScreenShare")]
    SignalScreenShare {
        call: String,
        from: String,
        payload: serde_json::Value,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Create a new Ack event.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        ServerEvent::Ack { id }
    }

    /// Create a new MessageAck event.
    #[must_use]
    pub fn message_ack(id: u64, message: impl Into<String>, timestamp: u64) -> Self {
        ServerEvent::MessageAck {
            id,
            message: message.into(),
            timestamp,
        }
    }

    /// Create a new Error event without details.
    #[must_use]
    pub fn error(id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            id,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a signal event of the given kind.
    #[must_use]
    pub fn signal(
        kind: SignalKind,
        call: impl Into<String>,
        from: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let call = call.into();
        let from = from.into();
        match kind {
            SignalKind::Offer => ServerEvent::SignalOffer { call, from, payload },
            SignalKind::Answer => ServerEvent::SignalAnswer { call, from, payload },
            SignalKind::IceCandidate => ServerEvent::SignalIceCandidate { call, from, payload },
            SignalKind::ScreenShare => ServerEvent::SignalScreenShare { call, from, payload },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_helpers() {
        assert_eq!(
            Destination::room("general"),
            Destination::Room {
                room: "general".to_string()
            }
        );
        assert_eq!(
            Destination::direct("u2"),
            Destination::Direct {
                identity: "u2".to_string()
            }
        );
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(u16::from(ErrorCode::HandshakeRejected), 4001);
        assert_eq!(ErrorCode::try_from(4004), Ok(ErrorCode::DestinationUnavailable));
        assert!(ErrorCode::try_from(9999).is_err());
    }

    #[test]
    fn test_signal_constructor_selects_event() {
        let payload = serde_json::json!({"sdp": "v=0"});
        let ev = ServerEvent::signal(SignalKind::Offer, "c1", "u1", payload.clone());
        assert!(matches!(ev, ServerEvent::SignalOffer { .. }));

        let ev = ServerEvent::signal(SignalKind::IceCandidate, "c1", "u1", payload);
        assert!(matches!(ev, ServerEvent::SignalIceCandidate { .. }));
    }

    #[test]
    fn test_event_tag_names() {
        let ev = ClientEvent::Typing {
            room: "g1".to_string(),
            is_typing: true,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["isTyping"], true);

        let ev = ServerEvent::UserStoppedTyping {
            room: "g1".to_string(),
            identity: "u1".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "userStoppedTyping");
    }
}
