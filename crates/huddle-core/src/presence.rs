//! Presence tracking and broadcasting.
//!
//! One record per identity, regardless of how many connections it holds:
//! an identity is Online while at least one connection is live and Offline
//! when the last one drops. State changes flow through exactly three entry
//! points (`on_first_connection`, `on_last_disconnection`, `set_status`) and
//! broadcast to a precomputed interested set — never a collaborator query at
//! broadcast time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use huddle_protocol::{PresenceStatus, ServerEvent};
use tracing::debug;

use crate::registry::ConnectionRegistry;
use crate::types::{unix_timestamp_ms, Identity, IdentityId};

/// Presence state for a single identity.
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    /// Identity this record belongs to.
    pub identity: IdentityId,
    /// Current status.
    pub status: PresenceStatus,
    /// Optional custom status message.
    pub custom_message: Option<String>,
    /// Last transition timestamp in Unix milliseconds.
    pub last_seen_at: u64,
}

/// Broadcasts presence transitions to interested identities.
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
    records: DashMap<IdentityId, PresenceRecord>,
    /// Watched identity → identities interested in its presence.
    interest: Mutex<HashMap<IdentityId, HashSet<IdentityId>>>,
}

impl PresenceBroadcaster {
    /// Create a new broadcaster delivering through the given registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            records: DashMap::new(),
            interest: Mutex::new(HashMap::new()),
        }
    }

    /// Seed mutual interest between an identity and its contacts.
    ///
    /// Called once per connect, before the online broadcast, so the
    /// interested set never requires a query at broadcast time.
    pub fn register_contacts(&self, identity: &str, contacts: &[IdentityId]) {
        if contacts.is_empty() {
            return;
        }
        let mut interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
        for contact in contacts {
            interest
                .entry(identity.to_string())
                .or_default()
                .insert(contact.clone());
            interest
                .entry(contact.clone())
                .or_default()
                .insert(identity.to_string());
        }
    }

    /// Link two identities as mutually interested (room co-members).
    pub fn link(&self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let mut interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
        interest
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        interest
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    /// First connection for an identity: mark Online and broadcast.
    pub fn on_first_connection(&self, identity: &Identity) {
        let now = unix_timestamp_ms();
        self.records.insert(
            identity.id.clone(),
            PresenceRecord {
                identity: identity.id.clone(),
                status: PresenceStatus::Online,
                custom_message: None,
                last_seen_at: now,
            },
        );

        let reached = self.broadcast(
            &identity.id,
            &ServerEvent::UserOnline {
                identity: identity.id.clone(),
                name: identity.display_name.clone(),
            },
        );
        debug!(identity = %identity.id, reached, "Presence: online");
    }

    /// Last connection gone: mark Offline and broadcast.
    pub fn on_last_disconnection(&self, identity: &str) {
        let now = unix_timestamp_ms();
        self.records.insert(
            identity.to_string(),
            PresenceRecord {
                identity: identity.to_string(),
                status: PresenceStatus::Offline,
                custom_message: None,
                last_seen_at: now,
            },
        );

        let reached = self.broadcast(
            identity,
            &ServerEvent::UserOffline {
                identity: identity.to_string(),
                last_seen: now,
            },
        );
        debug!(identity = %identity, reached, "Presence: offline");
    }

    /// Explicit status change. Always broadcasts, regardless of connection
    /// count, and additionally reaches the identity's own other connections.
    pub fn set_status(&self, identity: &str, status: PresenceStatus, custom_message: Option<String>) {
        let now = unix_timestamp_ms();
        self.records.insert(
            identity.to_string(),
            PresenceRecord {
                identity: identity.to_string(),
                status,
                custom_message: custom_message.clone(),
                last_seen_at: now,
            },
        );

        let event = ServerEvent::UserStatusChanged {
            identity: identity.to_string(),
            status,
            custom_message,
        };
        let reached = self.broadcast(identity, &event);
        self.registry.send_to_identity(identity, &event);
        debug!(identity = %identity, ?status, reached, "Presence: status changed");
    }

    /// Current presence record for an identity, if any transition was seen.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<PresenceRecord> {
        self.records.get(identity).map(|r| r.clone())
    }

    /// Deliver an event to every identity interested in `identity`.
    ///
    /// Offline watchers are skipped by the registry at no cost.
    fn broadcast(&self, identity: &str, event: &ServerEvent) -> usize {
        let watchers: Vec<IdentityId> = {
            let interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
            match interest.get(identity) {
                Some(set) => set.iter().cloned().collect(),
                None => return 0,
            }
        };

        let mut reached = 0;
        for watcher in watchers {
            reached += self.registry.send_to_identity(&watcher, event);
        }
        reached
    }
}
