//! Grid-constrained geometry for gridcanvas.
//!
//! Everything in this crate is a pure function over plain values:
//! - translate / clamp shapes against the fixed grid
//! - per-handle resize with minimum size floors
//! - drag rotation around a shape's center
//! - z-order reassignment
//!
//! Nothing here holds state, performs I/O, or knows about locks.

mod grid;
mod primitives;
mod resize;
mod rotate;
mod sizing;
mod zorder;

pub use grid::{clamp_to_grid, translate, Grid, GRID_HEIGHT, GRID_WIDTH};
pub use primitives::{Bounds, Geometry, GeometryUpdate, Point, Segment, Size};
pub use resize::{resize, ResizeHandle};
pub use rotate::{normalize_degrees, pointer_angle, rotate, rotation_center};
pub use sizing::{finalize_creation, ShapeType};
pub use zorder::{reorder, ZOrderOp};
