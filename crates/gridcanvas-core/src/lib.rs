//! Core canvas model for gridcanvas.
//!
//! - [`Shape`] records and partial [`ShapeUpdate`]s
//! - [`ShapeStore`]: shapes replicated through an automerge document
//! - [`LockManager`]: advisory per-shape leases with expiry
//! - [`Canvas`]: the mutation API that UI gestures and AI commands share
//!
//! Transport lives in `gridcanvas-sync`; this crate only produces and
//! consumes opaque change buffers.

pub mod canvas;
pub mod command;
pub mod document;
pub mod error;
pub mod interaction;
pub mod lock;
pub mod shape;
pub mod store;

pub use canvas::{Canvas, CanvasConfig, SharedCanvas};
pub use command::{parse_commands, BatchEntry, CanvasCommand, CommandReport};
pub use document::CanvasDoc;
pub use error::{Error, Result};
pub use interaction::{Gesture, Interaction};
pub use lock::{Clock, LockManager, LockSweeper, ManualClock, SystemClock, LOCK_TTL, SWEEP_INTERVAL};
pub use shape::{HolderId, LockLease, Shape, ShapeId, ShapeKind, ShapeUpdate, TextBox};
pub use store::{Origin, ShapeStore, StoreEvent};

pub use gridcanvas_geometry as geometry;
