//! # huddle-core
//!
//! The realtime engine behind huddle: presence, messaging relay, and call
//! signaling.
//!
//! This crate provides the coordinating components:
//!
//! - **ConnectionRegistry** - Which identities have which live connections
//! - **RoomManager** - Room membership per connection
//! - **MessageRouter** - Resolve, persist, fan out, acknowledge
//! - **PresenceBroadcaster** - Online/offline/status transitions
//! - **TypingIndicatorTracker** - TTL-based typing state
//! - **CallSignalRelay** - Call sessions and opaque signal pass-through
//! - **Hub** - Event dispatch and coordinated disconnect teardown
//!
//! ## Architecture
//!
//! ```text
//!                      ┌─────────────┐
//!  ClientEvent ───────▶│     Hub     │───────▶ ServerEvent fan-out
//!                      └──────┬──────┘
//!        ┌──────────┬─────────┼─────────┬──────────┐
//!        ▼          ▼         ▼         ▼          ▼
//!   ┌────────┐ ┌────────┐ ┌───────┐ ┌───────┐ ┌───────┐
//!   │ Rooms  │ │ Router │ │Typing │ │ Calls │ │Presence│
//!   └────┬───┘ └───┬────┘ └───┬───┘ └───┬───┘ └───┬───┘
//!        └─────────┴──────────┴─────────┴──────────┘
//!                             │
//!                    ┌────────▼─────────┐
//!                    │ConnectionRegistry│
//!                    └──────────────────┘
//! ```
//!
//! Persistence, credential verification, and direct-message authorization are
//! external collaborators behind traits; the engine holds no lock across any
//! call into them.

pub mod auth;
pub mod calls;
pub mod error;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod router;
pub mod store;
pub mod types;
pub mod typing;

pub use auth::{AuthGate, CredentialVerifier, RejectReason, VerifyError};
pub use calls::{CallSession, CallSignalRelay};
pub use error::EngineError;
pub use hub::{Hub, HubStats};
pub use presence::{PresenceBroadcaster, PresenceRecord};
pub use registry::{ConnectionRegistry, EventSender};
pub use rooms::RoomManager;
pub use router::{AuthorizationOracle, MessageRouter, OpenOracle, SendOutcome};
pub use store::{
    MemoryMessageStore, MessageStore, NewMessage, ReactionChange, StoreError, StoredMessage,
};
pub use types::{
    direct_room_id, validate_room_id, CallId, ConnectionId, Identity, IdentityId, MessageId,
    RoomId, RoomKind,
};
pub use typing::TypingIndicatorTracker;
