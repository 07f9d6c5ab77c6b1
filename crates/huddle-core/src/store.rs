//! Message persistence collaborator.
//!
//! The engine never writes durable state itself: message ids and timestamps
//! come from a `MessageStore` implementation, and nothing is fanned out until
//! the store has accepted the write. `MemoryMessageStore` is the bundled
//! reference implementation, used by the server default wiring and the test
//! suites; deployments implement the trait against their own database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::types::{unix_timestamp_ms, IdentityId, MessageId, RoomId};

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Room the message belongs to.
    pub room: RoomId,
    /// Author identity.
    pub author: IdentityId,
    /// Message body.
    pub content: String,
    /// Message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    /// Attachment references.
    pub attachments: Vec<String>,
}

/// The durable identity of a persisted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Store-assigned message id.
    pub id: MessageId,
    /// Store-assigned timestamp in Unix milliseconds.
    pub timestamp: u64,
}

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionChange {
    /// `true` if the reaction was added, `false` if removed.
    pub added: bool,
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No message with that id.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// The acting identity may not modify that message.
    #[error("Not permitted to modify message: {0}")]
    Forbidden(MessageId),

    /// The backend rejected the operation or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// External persistence collaborator.
///
/// `toggle_reaction` must be atomic per message: concurrent toggles from
/// different identities are a read-modify-write on a shared set and must
/// never lose each other's updates.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, returning its durable id and timestamp.
    async fn persist(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Replace a message's content. Only the author may edit.
    ///
    /// Returns the message id with the edit timestamp.
    async fn update(
        &self,
        message_id: &str,
        author: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Delete a message. Only the author may delete.
    async fn delete(&self, message_id: &str, author: &str) -> Result<(), StoreError>;

    /// Toggle an identity's reaction on a message: add if absent, else
    /// remove. Atomic per message.
    async fn toggle_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        identity: &str,
    ) -> Result<ReactionChange, StoreError>;
}

struct StoredRecord {
    message: NewMessage,
    timestamp: u64,
    edited_at: Option<u64>,
    reactions: HashMap<String, HashSet<IdentityId>>,
}

/// In-memory `MessageStore`.
///
/// Reaction toggles run under the message's map entry lock, which provides
/// the required per-message atomicity.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: DashMap<MessageId, StoredRecord>,
    next_id: AtomicU64,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Content of a stored message, if present.
    #[must_use]
    pub fn content_of(&self, message_id: &str) -> Option<String> {
        self.messages
            .get(message_id)
            .map(|r| r.message.content.clone())
    }

    /// Edit timestamp of a stored message, if it was ever edited.
    #[must_use]
    pub fn edited_at(&self, message_id: &str) -> Option<u64> {
        self.messages.get(message_id).and_then(|r| r.edited_at)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn persist(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let timestamp = unix_timestamp_ms();

        self.messages.insert(
            id.clone(),
            StoredRecord {
                message,
                timestamp,
                edited_at: None,
                reactions: HashMap::new(),
            },
        );

        Ok(StoredMessage { id, timestamp })
    }

    async fn update(
        &self,
        message_id: &str,
        author: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut record = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(message_id.to_string()))?;

        if record.message.author != author {
            return Err(StoreError::Forbidden(message_id.to_string()));
        }

        let now = unix_timestamp_ms();
        record.message.content = content.to_string();
        record.edited_at = Some(now);

        Ok(StoredMessage {
            id: message_id.to_string(),
            timestamp: now,
        })
    }

    async fn delete(&self, message_id: &str, author: &str) -> Result<(), StoreError> {
        match self
            .messages
            .remove_if(message_id, |_, record| record.message.author == author)
        {
            Some(_) => Ok(()),
            None if self.messages.contains_key(message_id) => {
                Err(StoreError::Forbidden(message_id.to_string()))
            }
            None => Err(StoreError::NotFound(message_id.to_string())),
        }
    }

    async fn toggle_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        identity: &str,
    ) -> Result<ReactionChange, StoreError> {
        let mut record = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(message_id.to_string()))?;

        let reactors = record.reactions.entry(emoji.to_string()).or_default();
        let added = reactors.insert(identity.to_string());
        if !added {
            reactors.remove(identity);
            if reactors.is_empty() {
                record.reactions.remove(emoji);
            }
        }

        Ok(ReactionChange { added })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> NewMessage {
        NewMessage {
            room: "g1".to_string(),
            author: "u1".to_string(),
            content: content.to_string(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_persist_assigns_unique_ids() {
        let store = MemoryMessageStore::new();

        let first = store.persist(message("a")).await.unwrap();
        let second = store.persist(message("b")).await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(first.timestamp > 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_update_checks_author() {
        let store = MemoryMessageStore::new();
        let stored = store.persist(message("draft")).await.unwrap();

        assert!(matches!(
            store.update(&stored.id, "u2", "hijacked").await,
            Err(StoreError::Forbidden(_))
        ));

        assert_eq!(store.edited_at(&stored.id), None);
        let updated = store.update(&stored.id, "u1", "final").await.unwrap();
        assert_eq!(store.content_of(&stored.id).as_deref(), Some("final"));
        assert_eq!(store.edited_at(&stored.id), Some(updated.timestamp));
    }

    #[tokio::test]
    async fn test_delete_checks_author() {
        let store = MemoryMessageStore::new();
        let stored = store.persist(message("gone soon")).await.unwrap();

        assert!(matches!(
            store.delete(&stored.id, "u2").await,
            Err(StoreError::Forbidden(_))
        ));
        store.delete(&stored.id, "u1").await.unwrap();
        assert!(matches!(
            store.delete(&stored.id, "u1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reaction_toggle_roundtrip() {
        let store = MemoryMessageStore::new();
        let stored = store.persist(message("react to me")).await.unwrap();

        let change = store.toggle_reaction(&stored.id, "👍", "u2").await.unwrap();
        assert!(change.added);

        let change = store.toggle_reaction(&stored.id, "👍", "u2").await.unwrap();
        assert!(!change.added);

        assert!(matches!(
            store.toggle_reaction("missing", "👍", "u2").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reactions_are_per_identity() {
        let store = MemoryMessageStore::new();
        let stored = store.persist(message("popular")).await.unwrap();

        assert!(store.toggle_reaction(&stored.id, "🎉", "u2").await.unwrap().added);
        assert!(store.toggle_reaction(&stored.id, "🎉", "u3").await.unwrap().added);
        // u2 removing does not affect u3.
        assert!(!store.toggle_reaction(&stored.id, "🎉", "u2").await.unwrap().added);
        assert!(!store.toggle_reaction(&stored.id, "🎉", "u3").await.unwrap().added);
    }
}
