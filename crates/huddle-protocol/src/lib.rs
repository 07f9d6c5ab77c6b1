//! # huddle-protocol
//!
//! Wire contract for the huddle realtime engine.
//!
//! This crate defines the events exchanged between clients and the server:
//!
//! - **ClientEvent** - Everything a client may send after the websocket opens
//! - **ServerEvent** - Everything the server pushes back
//! - **Codec** - Length-prefixed MessagePack framing
//! - **Version** - Protocol version negotiation
//!
//! The contract is deliberately transport-agnostic: frames are opaque byte
//! blobs to the websocket layer, and signal payloads are opaque JSON values
//! to the server.

pub mod codec;
pub mod events;
pub mod version;

pub use codec::ProtocolError;
pub use events::{
    CallKind, ChatMessage, ClientEvent, Destination, ErrorCode, PresenceStatus, ServerEvent,
    SignalKind,
};
pub use version::{Version, PROTOCOL_VERSION};
