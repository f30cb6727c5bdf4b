//! Drag sessions: move, resize, rotate.
//!
//! A drag takes the shape's lease when it starts, recomputes a preview on
//! every pointer event without touching the store, and writes a single
//! update when it is committed. Cancelling writes nothing but the release.

use gridcanvas_geometry::{
    clamp_to_grid, pointer_angle, resize, rotate, rotation_center, translate, Grid, Point,
    ResizeHandle, Size,
};

use crate::canvas::Canvas;
use crate::error::Result;
use crate::shape::{Shape, ShapeId, ShapeUpdate};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Move,
    Resize(ResizeHandle),
    Rotate { center: Point, start_angle: f64 },
}

/// An in-progress drag on one shape
#[derive(Debug, Clone)]
pub struct Interaction {
    original: Shape,
    preview: Shape,
    gesture: Gesture,
    origin: Point,
    pointer: Point,
    grid: Grid,
}

impl Interaction {
    pub fn shape_id(&self) -> &ShapeId {
        &self.original.id
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    /// What the shape would look like if committed now
    pub fn preview(&self) -> &Shape {
        &self.preview
    }

    /// Track the pointer. Only the preview changes.
    pub fn update(&mut self, pointer: Point) -> &Shape {
        self.pointer = pointer;
        let geometry = self.original.geometry();
        let (dx, dy) = (pointer.x - self.origin.x, pointer.y - self.origin.y);

        let mut preview = self.original.clone();
        match self.gesture {
            Gesture::Move => {
                let update = clamp_to_grid(translate(&geometry, dx, dy), &geometry, &self.grid);
                preview.kind.set_geometry(geometry.apply(&update));
            }
            Gesture::Resize(handle) => {
                // Floors apply at commit, not while dragging
                let update = resize(&geometry, handle, dx, dy, Size::ZERO, &self.grid);
                preview.kind.set_geometry(geometry.apply(&update));
            }
            Gesture::Rotate { center, start_angle } => {
                let current = pointer_angle(center, pointer);
                preview.rotation = rotate(self.original.rotation, start_angle, current);
            }
        }
        self.preview = preview;
        &self.preview
    }

    fn committed_update(&self) -> ShapeUpdate {
        match self.gesture {
            Gesture::Move => ShapeUpdate::geometry(self.preview.geometry().to_update()),
            Gesture::Resize(handle) => {
                let (dx, dy) = (self.pointer.x - self.origin.x, self.pointer.y - self.origin.y);
                let floor = self.original.shape_type().resize_floor();
                let geometry = self.original.geometry();
                ShapeUpdate::geometry(resize(&geometry, handle, dx, dy, floor, &self.grid))
            }
            Gesture::Rotate { .. } => ShapeUpdate::rotation(self.preview.rotation),
        }
    }
}

impl Canvas {
    /// Start dragging a shape. `None` if the shape is missing or leased by
    /// someone else.
    pub fn begin_move(&mut self, id: &ShapeId, pointer: Point) -> Option<Interaction> {
        self.begin(id, pointer, |_| Gesture::Move)
    }

    pub fn begin_resize(
        &mut self,
        id: &ShapeId,
        handle: ResizeHandle,
        pointer: Point,
    ) -> Option<Interaction> {
        self.begin(id, pointer, |_| Gesture::Resize(handle))
    }

    pub fn begin_rotate(&mut self, id: &ShapeId, pointer: Point) -> Option<Interaction> {
        self.begin(id, pointer, |shape| {
            let center = rotation_center(&shape.geometry());
            Gesture::Rotate {
                center,
                start_angle: pointer_angle(center, pointer),
            }
        })
    }

    fn begin(
        &mut self,
        id: &ShapeId,
        pointer: Point,
        gesture: impl FnOnce(&Shape) -> Gesture,
    ) -> Option<Interaction> {
        if !self.lock_shape(id) {
            return None;
        }
        let original = self.get(id)?.clone();
        Some(Interaction {
            gesture: gesture(&original),
            preview: original.clone(),
            original,
            origin: pointer,
            pointer,
            grid: *self.grid(),
        })
    }

    /// Write the drag's result as one update and release the lease.
    ///
    /// If the lease was lost mid-drag the update is rejected with
    /// `LockConflict` and nothing is written.
    pub fn commit(&mut self, interaction: Interaction) -> Result<bool> {
        let update = interaction.committed_update();
        let result = self.update_shape(interaction.shape_id(), update);
        self.unlock_shape(interaction.shape_id());
        result
    }

    /// Drop the drag. Only the lease release is written.
    pub fn cancel(&mut self, interaction: Interaction) {
        self.unlock_shape(interaction.shape_id());
    }
}
