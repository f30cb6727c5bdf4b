//! Networking for gridcanvas.
//!
//! A server hosts rooms, one per document id. Clients join a room over an
//! iroh connection, receive its full state, and from then on exchange
//! automerge change buffers and cursor payloads that the server relays to
//! every other member. Rooms are snapshotted while active and evicted once
//! idle.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod server;
pub mod snapshot;

pub use client::{Backoff, ClientHandle, ClientSession, ConnectionStatus};
pub use endpoint::{bind_endpoint, connect_room, decode_ticket, encode_ticket};
pub use error::{Error, Result};
pub use presence::{CursorActivity, CursorPresence, PresenceManager};
pub use protocol::{ClientFrame, ConnectionId, RoomId, ServerFrame, ALPN};
pub use room::{Membership, RoomConfig, RoomManager};
pub use server::{serve_connection, RoomProtocol};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotStore};
