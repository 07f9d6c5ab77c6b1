//! Room membership tracking.
//!
//! Rooms are created lazily on first join and deleted when their last member
//! leaves. Membership is kept in bidirectional maps (room → connections,
//! connection → rooms) so disconnect cleanup walks the connection's own
//! snapshot instead of scanning every room.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::EngineError;
use crate::types::{validate_room_id, ConnectionId, RoomId, RoomKind};

struct Room {
    kind: RoomKind,
    members: HashSet<ConnectionId>,
}

#[derive(Default)]
struct RoomsInner {
    rooms: HashMap<RoomId, Room>,
    by_connection: HashMap<ConnectionId, HashSet<RoomId>>,
}

/// Tracks which connections have joined which rooms.
#[derive(Default)]
pub struct RoomManager {
    inner: Mutex<RoomsInner>,
}

impl RoomManager {
    /// Create a new empty room manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RoomsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a connection to a room, creating the room if absent.
    ///
    /// Idempotent: joining a room twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` if the room id is invalid.
    pub fn join(&self, connection_id: &str, room_id: &str) -> Result<bool, EngineError> {
        validate_room_id(room_id).map_err(EngineError::ValidationFailure)?;

        let mut inner = self.lock();
        let room = inner
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!(room = %room_id, "Creating room");
                Room {
                    kind: RoomKind::classify(room_id),
                    members: HashSet::new(),
                }
            });

        let newly_joined = room.members.insert(connection_id.to_string());
        inner
            .by_connection
            .entry(connection_id.to_string())
            .or_default()
            .insert(room_id.to_string());

        if newly_joined {
            debug!(room = %room_id, connection = %connection_id, "Joined room");
        }
        Ok(newly_joined)
    }

    /// Remove a connection from a room, deleting the room if now empty.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&self, connection_id: &str, room_id: &str) -> bool {
        let mut inner = self.lock();
        let removed = match inner.rooms.get_mut(room_id) {
            Some(room) => {
                let removed = room.members.remove(connection_id);
                if room.members.is_empty() {
                    inner.rooms.remove(room_id);
                    debug!(room = %room_id, "Deleted empty room");
                }
                removed
            }
            None => false,
        };

        if let Some(joined) = inner.by_connection.get_mut(connection_id) {
            joined.remove(room_id);
            if joined.is_empty() {
                inner.by_connection.remove(connection_id);
            }
        }

        if removed {
            debug!(room = %room_id, connection = %connection_id, "Left room");
        }
        removed
    }

    /// Remove a connection from every room in its own joined snapshot.
    ///
    /// Returns the rooms it left. Called on disconnect, before the registry
    /// entry is removed.
    pub fn leave_all(&self, connection_id: &str) -> Vec<RoomId> {
        let mut inner = self.lock();
        let Some(joined) = inner.by_connection.remove(connection_id) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(joined.len());
        for room_id in joined {
            if let Some(room) = inner.rooms.get_mut(&room_id) {
                room.members.remove(connection_id);
                if room.members.is_empty() {
                    inner.rooms.remove(&room_id);
                }
            }
            left.push(room_id);
        }

        debug!(connection = %connection_id, rooms = left.len(), "Left all rooms");
        left
    }

    /// The connections currently in a room.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.lock()
            .rooms
            .get(room_id)
            .map(|room| room.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, connection_id: &str, room_id: &str) -> bool {
        self.lock()
            .rooms
            .get(room_id)
            .is_some_and(|room| room.members.contains(connection_id))
    }

    /// The rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &str) -> Vec<RoomId> {
        self.lock()
            .by_connection
            .get(connection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The kind of an existing room.
    #[must_use]
    pub fn kind(&self, room_id: &str) -> Option<RoomKind> {
        self.lock().rooms.get(room_id).map(|room| room.kind)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }
}
