//! Shared shape store: a keyed shape cache over the replicated document.
//!
//! The document is the source of truth; `shapes` mirrors it so reads don't
//! walk automerge. Local mutations queue their delta in an outbox for the
//! transport to drain, and every change (local or remote) bumps a
//! `watch` counter that renderers and the sync loop can wait on.

use std::collections::{HashMap, VecDeque};

use tokio::sync::watch;
use tracing::debug;

use crate::document::CanvasDoc;
use crate::error::{Error, Result};
use crate::shape::{LockLease, Shape, ShapeId, ShapeUpdate};

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Observable change to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added { id: ShapeId, origin: Origin },
    Updated { id: ShapeId, origin: Origin },
    Removed { id: ShapeId, origin: Origin },
}

impl StoreEvent {
    pub fn id(&self) -> &ShapeId {
        match self {
            StoreEvent::Added { id, .. }
            | StoreEvent::Updated { id, .. }
            | StoreEvent::Removed { id, .. } => id,
        }
    }
}

/// Replicated mapping from shape id to shape
#[derive(Debug)]
pub struct ShapeStore {
    doc: CanvasDoc,
    shapes: HashMap<ShapeId, Shape>,
    /// Local first-seen order; breaks z-index ties for rendering
    seen: HashMap<ShapeId, u64>,
    next_seq: u64,
    outbox: VecDeque<Vec<u8>>,
    changes: watch::Sender<u64>,
}

impl ShapeStore {
    pub fn new() -> Self {
        Self::from_doc(CanvasDoc::new())
    }

    /// Hydrate from a full-state encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut store = Self::from_doc(CanvasDoc::load(bytes)?);
        store.reconcile(Origin::Remote)?;
        Ok(store)
    }

    fn from_doc(doc: CanvasDoc) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            doc,
            shapes: HashMap::new(),
            seen: HashMap::new(),
            next_seq: 0,
            outbox: VecDeque::new(),
            changes,
        }
    }

    pub fn get(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn contains(&self, id: &ShapeId) -> bool {
        self.shapes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// All shapes in paint order: ascending z-index, ties by first-seen order
    pub fn all(&self) -> Vec<&Shape> {
        let mut shapes: Vec<&Shape> = self.shapes.values().collect();
        shapes.sort_by_key(|s| (s.z_index, self.seq(&s.id), s.id.clone()));
        shapes
    }

    /// `(id, z_index)` pairs in first-seen order, the input z-order
    /// operations expect
    pub fn layers(&self) -> Vec<(ShapeId, i64)> {
        let mut layers: Vec<(u64, ShapeId, i64)> = self
            .shapes
            .values()
            .map(|s| (self.seq(&s.id), s.id.clone(), s.z_index))
            .collect();
        layers.sort();
        layers.into_iter().map(|(_, id, z)| (id, z)).collect()
    }

    /// Highest z-index in use, if any shape exists
    pub fn max_z(&self) -> Option<i64> {
        self.shapes.values().map(|s| s.z_index).max()
    }

    pub fn add(&mut self, shape: Shape) -> Result<()> {
        if self.shapes.contains_key(&shape.id) {
            return Err(Error::DuplicateShape(shape.id));
        }
        let delta = self.doc.insert_shape(&shape)?;
        self.mark_seen(&shape.id);
        debug!(shape = %shape.id, kind = ?shape.shape_type(), "shape added");
        self.shapes.insert(shape.id.clone(), shape);
        self.publish(delta);
        Ok(())
    }

    /// Apply a partial update. Only fields that differ from the current
    /// value are written; returns `false` when nothing changed.
    pub fn update(&mut self, id: &ShapeId, update: &ShapeUpdate) -> Result<bool> {
        let Some(shape) = self.shapes.get(id) else {
            return Err(Error::ShapeNotFound(id.clone()));
        };
        let changes = update.changes_from(shape);
        if changes.is_empty() {
            return Ok(false);
        }
        let delta = self.doc.update_shape(id, &changes)?;
        self.refresh(id)?;
        self.publish(delta);
        Ok(true)
    }

    /// Apply several updates as one change. Unknown ids are skipped.
    /// Returns how many shapes were touched.
    pub fn batch_update(&mut self, updates: &[(ShapeId, ShapeUpdate)]) -> Result<usize> {
        let present: Vec<(ShapeId, ShapeUpdate)> = updates
            .iter()
            .filter_map(|(id, update)| {
                let changes = update.changes_from(self.shapes.get(id)?);
                (!changes.is_empty()).then(|| (id.clone(), changes))
            })
            .collect();
        if present.is_empty() {
            return Ok(0);
        }
        let delta = self.doc.update_shapes(&present)?;
        for (id, _) in &present {
            self.refresh(id)?;
        }
        self.publish(delta);
        Ok(present.len())
    }

    /// Delete a shape. Returns `false` if it was not present.
    pub fn remove(&mut self, id: &ShapeId) -> Result<bool> {
        if !self.shapes.contains_key(id) {
            return Ok(false);
        }
        let delta = self.doc.delete_shape(id)?;
        self.shapes.remove(id);
        self.seen.remove(id);
        debug!(shape = %id, "shape removed");
        self.publish(delta);
        Ok(true)
    }

    /// Write or clear the lock fields of a shape
    pub fn set_lock(&mut self, id: &ShapeId, lease: Option<LockLease>) -> Result<()> {
        if !self.shapes.contains_key(id) {
            return Err(Error::ShapeNotFound(id.clone()));
        }
        let delta = self.doc.set_lock(id, lease.as_ref())?;
        self.refresh(id)?;
        self.publish(delta);
        Ok(())
    }

    /// Merge bytes from another replica and report what changed.
    ///
    /// Bytes that contain nothing new produce no events.
    pub fn apply_remote(&mut self, bytes: &[u8]) -> Result<Vec<StoreEvent>> {
        if !self.doc.merge_bytes(bytes)? {
            return Ok(Vec::new());
        }
        let events = self.reconcile(Origin::Remote)?;
        self.notify();
        Ok(events)
    }

    /// Full-state encoding for snapshots and late joiners
    pub fn encode_full(&self) -> Vec<u8> {
        self.doc.save()
    }

    /// Drain deltas produced by local mutations, oldest first
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbox.drain(..).collect()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Counter bumped on every change; wait on it with `changed()`
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn seq(&self, id: &ShapeId) -> u64 {
        self.seen.get(id).copied().unwrap_or(u64::MAX)
    }

    fn mark_seen(&mut self, id: &ShapeId) {
        if !self.seen.contains_key(id) {
            self.seen.insert(id.clone(), self.next_seq);
            self.next_seq += 1;
        }
    }

    /// Re-read one shape from the document after a local write
    fn refresh(&mut self, id: &ShapeId) -> Result<()> {
        match self.doc.read_shape(id)? {
            Some(shape) => {
                self.shapes.insert(id.clone(), shape);
            }
            None => {
                self.shapes.remove(id);
                self.seen.remove(id);
            }
        }
        Ok(())
    }

    /// Rebuild the cache from the document, diffing against the old one
    fn reconcile(&mut self, origin: Origin) -> Result<Vec<StoreEvent>> {
        let mut merged = self.doc.read_all_shapes()?;
        merged.sort_by(|a, b| a.id.cmp(&b.id));
        let mut events = Vec::new();
        let mut next: HashMap<ShapeId, Shape> = HashMap::with_capacity(merged.len());

        for shape in merged {
            let id = shape.id.clone();
            if !self.shapes.contains_key(&id) {
                self.mark_seen(&id);
                events.push(StoreEvent::Added { id: id.clone(), origin });
            } else if self.shapes.get(&id) != Some(&shape) {
                events.push(StoreEvent::Updated { id: id.clone(), origin });
            }
            next.insert(id, shape);
        }

        let mut gone: Vec<ShapeId> = self
            .shapes
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        gone.sort();
        for id in gone {
            self.seen.remove(&id);
            events.push(StoreEvent::Removed { id, origin });
        }

        self.shapes = next;
        Ok(events)
    }

    fn publish(&mut self, delta: Option<Vec<u8>>) {
        if let Some(delta) = delta {
            self.outbox.push_back(delta);
            self.notify();
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }
}

impl Default for ShapeStore {
    fn default() -> Self {
        Self::new()
    }
}
