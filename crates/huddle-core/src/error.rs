//! Engine error taxonomy.

use huddle_protocol::ErrorCode;
use thiserror::Error;

use crate::auth::RejectReason;
use crate::types::{CallId, ConnectionId, IdentityId, RoomId};

/// Errors produced by engine operations.
///
/// Validation and authorization failures resolve locally and are reported
/// only to the originating connection; persistence failures abort the whole
/// operation with no partial fan-out.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Credential was missing, invalid, or expired; never registered.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(RejectReason),

    /// Sender lacks permission for the target.
    #[error("Not authorized for this destination")]
    AuthorizationDenied,

    /// Call target has no live connection.
    #[error("No live connection for {0}")]
    DestinationUnavailable(IdentityId),

    /// The persistence collaborator rejected or timed out.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Malformed or out-of-bounds payload.
    #[error("Validation failure: {0}")]
    ValidationFailure(&'static str),

    /// Event arrived for a connection the registry does not know.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Operation referenced a call session that does not exist.
    #[error("Unknown call: {0}")]
    UnknownCall(CallId),

    /// Sender is not a member of the target room.
    #[error("Not a member of room: {0}")]
    NotAMember(RoomId),
}

impl EngineError {
    /// The wire error code reported to clients.
    #[must_use]
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            EngineError::HandshakeRejected(_) => ErrorCode::HandshakeRejected,
            EngineError::AuthorizationDenied | EngineError::NotAMember(_) => {
                ErrorCode::AuthorizationDenied
            }
            EngineError::DestinationUnavailable(_) => ErrorCode::DestinationUnavailable,
            EngineError::PersistenceFailure(_) => ErrorCode::PersistenceFailure,
            EngineError::ValidationFailure(_) | EngineError::UnknownCall(_) => {
                ErrorCode::ValidationFailure
            }
            EngineError::UnknownConnection(_) => ErrorCode::Internal,
        }
    }
}
