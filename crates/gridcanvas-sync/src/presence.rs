//! Remote cursor tracking.
//!
//! Cursors travel as opaque `Awareness` payloads that the server relays
//! without looking inside. They never touch the shared document.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gridcanvas_core::geometry::Point;
use gridcanvas_core::{HolderId, ShapeId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::protocol::ConnectionId;

/// Remove cursors not updated in 5 seconds
pub const STALE_THRESHOLD: Duration = Duration::from_secs(5);

/// Number of distinct cursor colours a UI is expected to cycle through
pub const PALETTE_SIZE: u8 = 8;

/// What the remote user is doing with their pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CursorActivity {
    Idle,
    Selected { shape_id: ShapeId },
    Dragging { shape_id: ShapeId },
    Resizing { shape_id: ShapeId },
    Rotating { shape_id: ShapeId },
    Typing { shape_id: ShapeId },
}

impl CursorActivity {
    pub fn label(&self) -> &'static str {
        match self {
            CursorActivity::Idle => "Idle",
            CursorActivity::Selected { .. } => "Selected",
            CursorActivity::Dragging { .. } => "Moving",
            CursorActivity::Resizing { .. } => "Resizing",
            CursorActivity::Rotating { .. } => "Rotating",
            CursorActivity::Typing { .. } => "Typing",
        }
    }
}

/// One user's cursor as published to the room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPresence {
    pub holder: HolderId,
    pub position: Point,
    pub activity: CursorActivity,
    pub timestamp_ms: u64,
}

impl CursorPresence {
    pub fn new(holder: HolderId, position: Point, activity: CursorActivity) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            holder,
            position,
            activity,
            timestamp_ms,
        }
    }

    /// Stable colour slot derived from the holder id
    pub fn color_index(&self) -> u8 {
        let sum = self
            .holder
            .as_str()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        (sum % u32::from(PALETTE_SIZE)) as u8
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Remote cursors keyed by the connection that published them
#[derive(Debug)]
pub struct PresenceManager {
    local: HolderId,
    peers: HashMap<ConnectionId, (CursorPresence, Instant)>,
}

impl PresenceManager {
    pub fn new(local: HolderId) -> Self {
        Self {
            local,
            peers: HashMap::new(),
        }
    }

    pub fn local(&self) -> &HolderId {
        &self.local
    }

    /// Update or add a cursor. Our own, seen through another tab, is ignored.
    pub fn update_peer(&mut self, from: ConnectionId, presence: CursorPresence) {
        if presence.holder != self.local {
            self.peers.insert(from, (presence, Instant::now()));
        }
    }

    pub fn remove_peer(&mut self, from: ConnectionId) {
        self.peers.remove(&from);
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Drop cursors that have gone quiet
    pub fn prune_stale(&mut self) {
        let now = Instant::now();
        self.peers
            .retain(|_, (_, last)| now.duration_since(*last) < STALE_THRESHOLD);
    }

    pub fn get(&self, from: ConnectionId) -> Option<&CursorPresence> {
        self.peers.get(&from).map(|(p, _)| p)
    }

    pub fn active_peers(&self) -> impl Iterator<Item = &CursorPresence> {
        self.peers.values().map(|(p, _)| p)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
