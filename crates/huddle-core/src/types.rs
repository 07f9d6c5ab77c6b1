//! Core identifier types and shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// One live transport session from a single client instance.
pub type ConnectionId = String;

/// The authenticated principal behind one or more connections.
pub type IdentityId = String;

/// A logical fan-out group (direct pair, group, or server channel).
pub type RoomId = String;

/// A call session identifier.
pub type CallId = String;

/// A durable, store-assigned message identifier.
pub type MessageId = String;

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Maximum chat message content length in characters.
pub const MAX_CONTENT_LENGTH: usize = 4096;

/// Maximum custom status message length in characters.
pub const MAX_STATUS_LENGTH: usize = 128;

/// Prefix of deterministic direct-pair room ids.
const DIRECT_PREFIX: &str = "dm:";

/// Prefix of server-channel room ids.
const CHANNEL_PREFIX: &str = "channel:";

/// Current Unix timestamp in milliseconds.
#[must_use]
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// The fan-out-relevant fields of an authenticated principal, as resolved by
/// the credential verifier. The engine caches nothing else about a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable identity id.
    pub id: IdentityId,
    /// Display name at connect time.
    pub display_name: String,
    /// Identities interested in this one's presence (friends list).
    pub contacts: Vec<IdentityId>,
}

impl Identity {
    /// Create an identity without contacts.
    #[must_use]
    pub fn new(id: impl Into<IdentityId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            contacts: Vec::new(),
        }
    }

    /// Attach a contact list.
    #[must_use]
    pub fn with_contacts(mut self, contacts: Vec<IdentityId>) -> Self {
        self.contacts = contacts;
        self
    }
}

/// What kind of fan-out group a room is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Deterministic two-identity room.
    DirectPair,
    /// Ad-hoc group conversation.
    Group,
    /// A channel under a server.
    ServerChannel,
}

impl RoomKind {
    /// Classify a room id by its shape.
    #[must_use]
    pub fn classify(room_id: &str) -> RoomKind {
        if room_id.starts_with(DIRECT_PREFIX) {
            RoomKind::DirectPair
        } else if room_id.starts_with(CHANNEL_PREFIX) {
            RoomKind::ServerChannel
        } else {
            RoomKind::Group
        }
    }
}

/// Validate a room id.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if room_id.starts_with('$') {
        return Err("Room ids starting with '$' are reserved");
    }
    if !room_id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// Derive the deterministic direct-pair room id for two identities.
///
/// The ids are sorted before concatenation, so both sides compute the same
/// room without a lookup.
#[must_use]
pub fn direct_room_id(a: &str, b: &str) -> RoomId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{DIRECT_PREFIX}{lo}:{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_room_id_symmetric() {
        assert_eq!(direct_room_id("alice", "bob"), direct_room_id("bob", "alice"));
        assert_eq!(direct_room_id("alice", "bob"), "dm:alice:bob");
    }

    #[test]
    fn test_room_kind_classification() {
        assert_eq!(RoomKind::classify("dm:a:b"), RoomKind::DirectPair);
        assert_eq!(RoomKind::classify("channel:srv1/general"), RoomKind::ServerChannel);
        assert_eq!(RoomKind::classify("book-club"), RoomKind::Group);
    }

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("general").is_ok());
        assert!(validate_room_id("dm:a:b").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("$internal").is_err());

        let long_id = "a".repeat(MAX_ROOM_ID_LENGTH + 1);
        assert!(validate_room_id(&long_id).is_err());
    }

    #[test]
    fn test_identity_builder() {
        let identity = Identity::new("u1", "Alice").with_contacts(vec!["u2".to_string()]);
        assert_eq!(identity.id, "u1");
        assert_eq!(identity.contacts, vec!["u2".to_string()]);
    }
}
