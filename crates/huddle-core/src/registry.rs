//! Connection registry: the identity ⇔ connection bookkeeping.
//!
//! One identity may hold many live connections (desktop, phone, browser tab);
//! "online" and "broadcast to user" are therefore set operations. The
//! registry is the single source of truth for connectivity and the one place
//! the per-connection outbound channels live.
//!
//! All maps sit behind one mutex so that `register`/`deregister` can answer
//! "first connection for this identity?" / "last one gone?" exactly. Every
//! operation is a short in-memory mutation; the lock is never held across an
//! await.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use huddle_protocol::ServerEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::types::{unix_timestamp_ms, ConnectionId, Identity, IdentityId};

/// Outbound channel for one connection.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct ConnectionEntry {
    identity: IdentityId,
    sender: EventSender,
    connected_at: u64,
}

#[derive(Default)]
struct RegistryInner {
    /// Connection id → entry.
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Identity id → its live connection ids.
    by_identity: HashMap<IdentityId, HashSet<ConnectionId>>,
    /// Display names cached while an identity has at least one connection.
    names: HashMap<IdentityId, String>,
}

/// Registry of live connections, keyed both ways.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection under an identity.
    ///
    /// Returns `true` if this is the identity's first live connection.
    pub fn register(
        &self,
        connection_id: impl Into<ConnectionId>,
        identity: &Identity,
        sender: EventSender,
    ) -> bool {
        let connection_id = connection_id.into();
        let mut inner = self.lock();

        inner.connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                identity: identity.id.clone(),
                sender,
                connected_at: unix_timestamp_ms(),
            },
        );

        let siblings = inner.by_identity.entry(identity.id.clone()).or_default();
        siblings.insert(connection_id.clone());
        let first = siblings.len() == 1;

        inner
            .names
            .insert(identity.id.clone(), identity.display_name.clone());

        debug!(
            connection = %connection_id,
            identity = %identity.id,
            first,
            "Connection registered"
        );
        first
    }

    /// Deregister a connection.
    ///
    /// Returns the identity it belonged to and whether it was that identity's
    /// last live connection, or `None` if the connection was unknown.
    pub fn deregister(&self, connection_id: &str) -> Option<(IdentityId, bool)> {
        let mut inner = self.lock();

        let entry = inner.connections.remove(connection_id)?;
        let identity = entry.identity;

        let last = match inner.by_identity.get_mut(&identity) {
            Some(siblings) => {
                siblings.remove(connection_id);
                siblings.is_empty()
            }
            None => true,
        };

        if last {
            inner.by_identity.remove(&identity);
            inner.names.remove(&identity);
        }

        debug!(connection = %connection_id, identity = %identity, last, "Connection deregistered");
        Some((identity, last))
    }

    /// All live connection ids for an identity.
    #[must_use]
    pub fn connections_of(&self, identity: &str) -> Vec<ConnectionId> {
        self.lock()
            .by_identity
            .get(identity)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether an identity has at least one live connection.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.lock()
            .by_identity
            .get(identity)
            .is_some_and(|set| !set.is_empty())
    }

    /// The identity a connection is registered under.
    #[must_use]
    pub fn identity_of(&self, connection_id: &str) -> Option<IdentityId> {
        self.lock()
            .connections
            .get(connection_id)
            .map(|e| e.identity.clone())
    }

    /// The cached display name for an identity, while it is online.
    #[must_use]
    pub fn display_name(&self, identity: &str) -> Option<String> {
        self.lock().names.get(identity).cloned()
    }

    /// When a connection was registered, in Unix milliseconds.
    #[must_use]
    pub fn connected_at(&self, connection_id: &str) -> Option<u64> {
        self.lock()
            .connections
            .get(connection_id)
            .map(|e| e.connected_at)
    }

    /// Deliver an event to one connection.
    ///
    /// Returns `false` if the connection is unknown or its receiver is gone.
    pub fn send_to_connection(&self, connection_id: &str, event: ServerEvent) -> bool {
        let inner = self.lock();
        match inner.connections.get(connection_id) {
            Some(entry) => {
                let ok = entry.sender.send(event).is_ok();
                if !ok {
                    warn!(connection = %connection_id, "Outbound channel closed");
                }
                ok
            }
            None => {
                trace!(connection = %connection_id, "Send to unknown connection");
                false
            }
        }
    }

    /// Deliver an event to every connection of an identity.
    ///
    /// Returns the number of connections reached. A no-op for offline
    /// identities.
    pub fn send_to_identity(&self, identity: &str, event: &ServerEvent) -> usize {
        let inner = self.lock();
        let Some(siblings) = inner.by_identity.get(identity) else {
            return 0;
        };

        let mut delivered = 0;
        for connection_id in siblings {
            if let Some(entry) = inner.connections.get(connection_id) {
                if entry.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Deliver an event to a set of connections.
    ///
    /// Returns the number of connections reached.
    pub fn send_to_connections<'a, I>(&self, targets: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let inner = self.lock();
        let mut delivered = 0;
        for connection_id in targets {
            if let Some(entry) = inner.connections.get(connection_id.as_str()) {
                if entry.sender.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Total number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Total number of online identities.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.lock().by_identity.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (EventSender, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_register_first_and_last() {
        let registry = ConnectionRegistry::new();
        let identity = Identity::new("u1", "Alice");

        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();

        assert!(registry.register("c1", &identity, tx1));
        assert!(!registry.register("c2", &identity, tx2));

        assert_eq!(registry.deregister("c1"), Some(("u1".to_string(), false)));
        assert_eq!(registry.deregister("c2"), Some(("u1".to_string(), true)));
        assert_eq!(registry.deregister("c2"), None);
    }

    #[test]
    fn test_online_iff_connections_nonempty() {
        let registry = ConnectionRegistry::new();
        let identity = Identity::new("u1", "Alice");

        assert!(!registry.is_online("u1"));
        assert!(registry.connections_of("u1").is_empty());

        let (tx, _rx) = sender();
        registry.register("c1", &identity, tx);
        assert!(registry.is_online("u1"));
        assert_eq!(registry.connections_of("u1"), vec!["c1".to_string()]);

        registry.deregister("c1");
        assert!(!registry.is_online("u1"));
        assert!(registry.connections_of("u1").is_empty());
    }

    #[test]
    fn test_identity_and_name_lookup() {
        let registry = ConnectionRegistry::new();
        let identity = Identity::new("u1", "Alice");

        let (tx, _rx) = sender();
        registry.register("c1", &identity, tx);

        assert_eq!(registry.identity_of("c1"), Some("u1".to_string()));
        assert_eq!(registry.display_name("u1"), Some("Alice".to_string()));

        registry.deregister("c1");
        assert_eq!(registry.identity_of("c1"), None);
        assert_eq!(registry.display_name("u1"), None);
    }

    #[test]
    fn test_send_to_identity_reaches_all_connections() {
        let registry = ConnectionRegistry::new();
        let identity = Identity::new("u1", "Alice");

        let (tx1, mut rx1) = sender();
        let (tx2, mut rx2) = sender();
        registry.register("c1", &identity, tx1);
        registry.register("c2", &identity, tx2);

        let delivered = registry.send_to_identity("u1", &ServerEvent::ack(7));
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        assert_eq!(registry.send_to_identity("u2", &ServerEvent::ack(8)), 0);
    }

    #[test]
    fn test_send_to_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_connection("nope", ServerEvent::ack(1)));
    }
}
