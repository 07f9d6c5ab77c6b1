//! Typing indicator tracking with TTL expiry.
//!
//! Typing state is unpersisted and short-lived: an entry either gets
//! refreshed, explicitly stopped (by the client or by a successful send), or
//! expired by the periodic sweep. Expiry runs off one deadline min-heap with
//! lazy deletion, not one timer per typing event, so resource use stays
//! bounded under load.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use huddle_protocol::ServerEvent;
use tracing::{debug, trace};

use crate::registry::ConnectionRegistry;
use crate::rooms::RoomManager;
use crate::types::{IdentityId, RoomId};

#[derive(Default)]
struct TypingInner {
    /// Live typing state: (room, identity) → current deadline.
    states: HashMap<(RoomId, IdentityId), Instant>,
    /// Queued deadlines; entries may be stale after a refresh or stop.
    deadlines: BinaryHeap<Reverse<(Instant, RoomId, IdentityId)>>,
}

/// Tracks who is typing where, and expires silent entries.
pub struct TypingIndicatorTracker {
    ttl: Duration,
    rooms: Arc<RoomManager>,
    registry: Arc<ConnectionRegistry>,
    inner: Mutex<TypingInner>,
}

impl TypingIndicatorTracker {
    /// Create a tracker with the given typing TTL.
    #[must_use]
    pub fn new(ttl: Duration, rooms: Arc<RoomManager>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            ttl,
            rooms,
            registry,
            inner: Mutex::new(TypingInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TypingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that an identity is typing in a room and notify co-members.
    ///
    /// Repeated calls refresh the deadline rather than duplicate state.
    pub fn start_typing(&self, room_id: &str, identity: &str, now: Instant) {
        let deadline = now + self.ttl;
        {
            let mut inner = self.lock();
            inner
                .states
                .insert((room_id.to_string(), identity.to_string()), deadline);
            inner.deadlines.push(Reverse((
                deadline,
                room_id.to_string(),
                identity.to_string(),
            )));
        }

        let name = self
            .registry
            .display_name(identity)
            .unwrap_or_else(|| identity.to_string());
        self.broadcast_except(
            room_id,
            identity,
            &ServerEvent::UserTyping {
                room: room_id.to_string(),
                identity: identity.to_string(),
                name,
            },
        );
        trace!(room = %room_id, identity = %identity, "Typing started");
    }

    /// Clear an identity's typing state in a room and notify co-members.
    ///
    /// Returns `true` if the identity was typing.
    pub fn stop_typing(&self, room_id: &str, identity: &str) -> bool {
        let removed = self
            .lock()
            .states
            .remove(&(room_id.to_string(), identity.to_string()))
            .is_some();

        if removed {
            self.broadcast_except(
                room_id,
                identity,
                &ServerEvent::UserStoppedTyping {
                    room: room_id.to_string(),
                    identity: identity.to_string(),
                },
            );
            trace!(room = %room_id, identity = %identity, "Typing stopped");
        }
        removed
    }

    /// Whether an identity is currently marked as typing in a room.
    #[must_use]
    pub fn is_typing(&self, room_id: &str, identity: &str) -> bool {
        self.lock()
            .states
            .contains_key(&(room_id.to_string(), identity.to_string()))
    }

    /// Expire stale entries whose client never signaled stop.
    ///
    /// Pops the deadline heap up to `now`, skipping entries refreshed or
    /// stopped since they were queued, and broadcasts `userStoppedTyping`
    /// for each genuine expiry. Returns the number expired.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<(RoomId, IdentityId)> = {
            let mut inner = self.lock();
            let mut expired = Vec::new();

            loop {
                let due = matches!(
                    inner.deadlines.peek(),
                    Some(Reverse((deadline, _, _))) if *deadline <= now
                );
                if !due {
                    break;
                }
                let Some(Reverse((deadline, room_id, identity))) = inner.deadlines.pop() else {
                    break;
                };

                let key = (room_id, identity);
                match inner.states.get(&key) {
                    // Refreshed since this heap entry was queued.
                    Some(current) if *current > deadline => {}
                    Some(_) => {
                        inner.states.remove(&key);
                        expired.push(key);
                    }
                    // Already stopped explicitly.
                    None => {}
                }
            }
            expired
        };

        for (room_id, identity) in &expired {
            self.broadcast_except(
                room_id,
                identity,
                &ServerEvent::UserStoppedTyping {
                    room: room_id.clone(),
                    identity: identity.clone(),
                },
            );
        }

        if !expired.is_empty() {
            debug!(expired = expired.len(), "Typing sweep expired entries");
        }
        expired.len()
    }

    /// The configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deliver to every room member except the originator identity.
    fn broadcast_except(&self, room_id: &str, except_identity: &str, event: &ServerEvent) {
        for connection_id in self.rooms.members(room_id) {
            match self.registry.identity_of(&connection_id) {
                Some(identity) if identity == except_identity => {}
                Some(_) => {
                    self.registry.send_to_connection(&connection_id, event.clone());
                }
                None => {}
            }
        }
    }
}
