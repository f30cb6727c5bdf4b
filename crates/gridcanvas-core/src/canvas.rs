//! The canvas service object: one local replica plus the rules around it.
//!
//! UI gestures and AI commands both go through these methods. Every
//! geometry change is floored and clamped before it reaches the store, and
//! shapes leased by another holder are rejected with `LockConflict`.

use std::sync::Arc;
use std::time::Duration;

use gridcanvas_geometry::{
    clamp_to_grid, finalize_creation, reorder, resize, translate, Geometry, GeometryUpdate, Grid,
    Point, ResizeHandle, ShapeType, ZOrderOp,
};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::lock::{Clock, LockManager, LockSweeper, SystemClock, LOCK_TTL, SWEEP_INTERVAL};
use crate::shape::{HolderId, Shape, ShapeId, ShapeKind, ShapeUpdate};
use crate::store::{ShapeStore, StoreEvent};

/// A canvas shared between the UI and the sync task
pub type SharedCanvas = Arc<Mutex<Canvas>>;

/// Client-side canvas settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasConfig {
    pub grid: Grid,
    pub lock_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            grid: Grid::default(),
            lock_ttl: LOCK_TTL,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub struct Canvas {
    store: ShapeStore,
    locks: LockManager,
    config: CanvasConfig,
    clock: Arc<dyn Clock>,
}

impl Canvas {
    pub fn new(holder: HolderId) -> Self {
        Self::with_config(holder, CanvasConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(holder: HolderId, config: CanvasConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: ShapeStore::new(),
            locks: LockManager::with_ttl(holder, config.lock_ttl),
            config,
            clock,
        }
    }

    pub fn into_shared(self) -> SharedCanvas {
        Arc::new(Mutex::new(self))
    }

    /// Start the periodic lock sweep for a shared canvas
    pub async fn start_sweeper(canvas: &SharedCanvas) -> LockSweeper {
        let every = canvas.lock().await.config.sweep_interval;
        LockSweeper::spawn(canvas.clone(), every)
    }

    pub fn holder(&self) -> &HolderId {
        self.locks.local()
    }

    pub fn grid(&self) -> &Grid {
        &self.config.grid
    }

    pub fn store(&self) -> &ShapeStore {
        &self.store
    }

    pub fn get(&self, id: &ShapeId) -> Option<&Shape> {
        self.store.get(id)
    }

    /// Shapes in paint order
    pub fn shapes(&self) -> Vec<&Shape> {
        self.store.all()
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // --- Replication ---

    pub fn apply_remote(&mut self, bytes: &[u8]) -> Result<Vec<StoreEvent>> {
        self.store.apply_remote(bytes)
    }

    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        self.store.take_outbound()
    }

    pub fn encode_full(&self) -> Vec<u8> {
        self.store.encode_full()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    // --- Mutations ---

    /// Insert a shape, flooring and clamping its geometry first
    pub fn add_shape(&mut self, mut shape: Shape) -> Result<()> {
        let geometry = shape.geometry();
        let committed = self.commit_geometry(shape.shape_type(), &geometry, geometry.to_update());
        shape.kind.set_geometry(geometry.apply(&committed));
        self.store.add(shape)
    }

    /// Apply a partial update. Returns whether anything changed.
    pub fn update_shape(&mut self, id: &ShapeId, update: ShapeUpdate) -> Result<bool> {
        let shape = self.editable(id)?;
        let update = self.normalize(&shape, update);
        self.store.update(id, &update)
    }

    pub fn remove_shape(&mut self, id: &ShapeId) -> Result<bool> {
        match self.editable(id) {
            Ok(_) => self.store.remove(id),
            Err(Error::ShapeNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Apply several updates as one change. Locked and missing shapes are
    /// skipped; returns how many shapes changed.
    pub fn batch_update(&mut self, updates: Vec<(ShapeId, ShapeUpdate)>) -> Result<usize> {
        let mut accepted = Vec::with_capacity(updates.len());
        for (id, update) in updates {
            match self.editable(&id) {
                Ok(shape) => {
                    let update = self.normalize(&shape, update);
                    accepted.push((id, update));
                }
                Err(e) if e.is_recoverable() => {
                    debug!(shape = %id, error = %e, "skipping batch entry")
                }
                Err(e) => return Err(e),
            }
        }
        self.store.batch_update(&accepted)
    }

    /// Take the lease on a shape for the local holder
    pub fn lock_shape(&mut self, id: &ShapeId) -> bool {
        let now = self.now_ms();
        let holder = self.locks.local().clone();
        self.locks.acquire(&mut self.store, id, &holder, now)
    }

    /// Release the local holder's lease, if it has one
    pub fn unlock_shape(&mut self, id: &ShapeId) -> bool {
        let holder = self.locks.local().clone();
        self.locks.release(&mut self.store, id, &holder)
    }

    /// Whether someone other than the local holder has a live lease
    pub fn is_locked(&self, id: &ShapeId) -> bool {
        self.locks.is_locked(&self.store, id, self.locks.local(), self.now_ms())
    }

    pub fn sweep_locks(&mut self) -> Vec<ShapeId> {
        let now = self.now_ms();
        self.locks.sweep(&mut self.store, now)
    }

    pub fn bring_to_front(&mut self, id: &ShapeId) -> Result<bool> {
        self.reorder_shape(id, ZOrderOp::BringToFront)
    }

    pub fn send_to_back(&mut self, id: &ShapeId) -> Result<bool> {
        self.reorder_shape(id, ZOrderOp::SendToBack)
    }

    pub fn bring_forward(&mut self, id: &ShapeId) -> Result<bool> {
        self.reorder_shape(id, ZOrderOp::BringForward)
    }

    pub fn send_backward(&mut self, id: &ShapeId) -> Result<bool> {
        self.reorder_shape(id, ZOrderOp::SendBackward)
    }

    /// Apply a z-order operation; every reassignment lands in one change.
    ///
    /// A swap touches the neighbour too, so the whole operation is refused
    /// if any shape it would renumber is leased by someone else.
    pub fn reorder_shape(&mut self, id: &ShapeId, op: ZOrderOp) -> Result<bool> {
        self.editable(id)?;
        let updates: Vec<(ShapeId, ShapeUpdate)> = reorder(&self.store.layers(), op, id)
            .into_iter()
            .map(|(id, z)| (id, ShapeUpdate::z_index(z)))
            .collect();
        if updates.is_empty() {
            return Ok(false);
        }
        for (changed, _) in &updates {
            self.editable(changed)?;
        }
        Ok(self.store.batch_update(&updates)? > 0)
    }

    pub fn move_shape(&mut self, id: &ShapeId, dx: f64, dy: f64) -> Result<bool> {
        let shape = self.editable(id)?;
        let update = translate(&shape.geometry(), dx, dy);
        self.update_shape(id, ShapeUpdate::geometry(update))
    }

    /// Drag a handle by (dx, dy), applying the shape type's size floor
    pub fn resize_shape(
        &mut self,
        id: &ShapeId,
        handle: ResizeHandle,
        dx: f64,
        dy: f64,
    ) -> Result<bool> {
        let shape = self.editable(id)?;
        let floor = shape.shape_type().resize_floor();
        let update = resize(&shape.geometry(), handle, dx, dy, floor, &self.config.grid);
        self.update_shape(id, ShapeUpdate::geometry(update))
    }

    /// Set the absolute rotation in degrees
    pub fn rotate_shape(&mut self, id: &ShapeId, degrees: f64) -> Result<bool> {
        self.update_shape(id, ShapeUpdate::rotation(degrees))
    }

    pub fn set_text(&mut self, id: &ShapeId, text: impl Into<String>) -> Result<bool> {
        self.update_shape(
            id,
            ShapeUpdate {
                text: Some(text.into()),
                ..Default::default()
            },
        )
    }

    /// Commit a creation drag from `start` to `end` as a new shape on top
    pub fn create_shape(
        &mut self,
        shape_type: ShapeType,
        start: Point,
        end: Point,
    ) -> Result<ShapeId> {
        let geometry = finalize_creation(shape_type, start, end, &self.config.grid);
        let id = ShapeId::new();
        let kind =
            ShapeKind::from_geometry(shape_type, geometry).ok_or_else(|| Error::InvalidRecord {
                id: id.to_string(),
                reason: format!("{shape_type:?} cannot hold {geometry:?}"),
            })?;
        let z_index = self.store.max_z().map_or(0, |z| z + 1);
        self.store.add(Shape::new(id.clone(), kind).with_z(z_index))?;
        Ok(id)
    }

    /// Clone of the shape if the local holder may edit it
    pub(crate) fn editable(&self, id: &ShapeId) -> Result<Shape> {
        let shape = self.store.get(id).ok_or_else(|| Error::ShapeNotFound(id.clone()))?;
        if let Some(holder) = self
            .locks
            .blocking_holder(&self.store, id, self.locks.local(), self.now_ms())
        {
            return Err(Error::LockConflict {
                shape: id.clone(),
                holder,
            });
        }
        Ok(shape.clone())
    }

    /// Floor and clamp the geometry part of an update against `shape`
    fn normalize(&self, shape: &Shape, mut update: ShapeUpdate) -> ShapeUpdate {
        if !update.geometry.is_empty() {
            update.geometry =
                self.commit_geometry(shape.shape_type(), &shape.geometry(), update.geometry);
        }
        update
    }

    fn commit_geometry(
        &self,
        shape_type: ShapeType,
        current: &Geometry,
        mut update: GeometryUpdate,
    ) -> GeometryUpdate {
        if let Geometry::Box(b) = current.apply(&update) {
            let floor = shape_type.resize_floor();
            if b.width < floor.width {
                update.width = Some(floor.width);
            }
            if b.height < floor.height {
                update.height = Some(floor.height);
            }
        }
        clamp_to_grid(update, current, &self.config.grid)
    }
}
