//! The fixed canvas area and the move/clamp transforms against it.

use serde::{Deserialize, Serialize};

use crate::primitives::{Geometry, GeometryUpdate};

/// Default canvas width in canonical units
pub const GRID_WIDTH: f64 = 5000.0;
/// Default canvas height in canonical units
pub const GRID_HEIGHT: f64 = 5000.0;

/// Bounds every shape has to stay inside: `[0, width] x [0, height]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub width: f64,
    pub height: f64,
}

impl Grid {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn clamp_x(&self, x: f64) -> f64 {
        x.clamp(0.0, self.width)
    }

    pub fn clamp_y(&self, y: f64) -> f64 {
        y.clamp(0.0, self.height)
    }

    /// True when every position-bearing coordinate lies inside the grid.
    ///
    /// Far edges are compared with a small tolerance since `x + width` is
    /// recomputed from a clamped `x`.
    pub fn contains(&self, geometry: &Geometry) -> bool {
        const EPS: f64 = 1e-6;
        match geometry {
            Geometry::Box(b) => {
                b.x >= 0.0
                    && b.y >= 0.0
                    && b.right() <= self.width + EPS
                    && b.bottom() <= self.height + EPS
            }
            Geometry::Line(s) => [s.x, s.x2].iter().all(|x| (0.0..=self.width).contains(x))
                && [s.y, s.y2].iter().all(|y| (0.0..=self.height).contains(y)),
        }
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(GRID_WIDTH, GRID_HEIGHT)
    }
}

/// Translate every position field by (dx, dy).
///
/// Lines move both endpoints by the same delta, so length and direction
/// are preserved before clamping.
pub fn translate(geometry: &Geometry, dx: f64, dy: f64) -> GeometryUpdate {
    match geometry {
        Geometry::Box(b) => GeometryUpdate {
            x: Some(b.x + dx),
            y: Some(b.y + dy),
            ..Default::default()
        },
        Geometry::Line(s) => GeometryUpdate {
            x: Some(s.x + dx),
            y: Some(s.y + dy),
            x2: Some(s.x2 + dx),
            y2: Some(s.y2 + dy),
            ..Default::default()
        },
    }
}

/// Pull a candidate update back inside the grid.
///
/// Boxes keep their size and slide so that `x in [0, W - width]` and
/// `y in [0, H - height]`. A box wider than the grid is narrowed to fit.
/// Line endpoints are clamped independently, which can change the segment's
/// length and angle when only one endpoint leaves the grid.
pub fn clamp_to_grid(update: GeometryUpdate, geometry: &Geometry, grid: &Grid) -> GeometryUpdate {
    match geometry.apply(&update) {
        Geometry::Box(b) => {
            let mut out = update;
            let width = b.width.min(grid.width);
            let height = b.height.min(grid.height);
            if width != b.width || update.width.is_some() {
                out.width = Some(width);
            }
            if height != b.height || update.height.is_some() {
                out.height = Some(height);
            }
            out.x = Some(b.x.clamp(0.0, grid.width - width));
            out.y = Some(b.y.clamp(0.0, grid.height - height));
            out
        }
        Geometry::Line(s) => GeometryUpdate {
            x: Some(grid.clamp_x(s.x)),
            y: Some(grid.clamp_y(s.y)),
            x2: Some(grid.clamp_x(s.x2)),
            y2: Some(grid.clamp_y(s.y2)),
            ..update
        },
    }
}
