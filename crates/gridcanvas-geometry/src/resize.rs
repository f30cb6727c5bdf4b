//! Per-handle resize.

use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::primitives::{Geometry, GeometryUpdate, Size};

/// Which part of a shape is being dragged.
///
/// The eight box handles encode which edges move; `Start`/`End` relocate a
/// line endpoint directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResizeHandle {
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
    Start,
    End,
}

#[derive(Debug, Clone, Copy, Default)]
struct Edges {
    left: bool,
    top: bool,
    right: bool,
    bottom: bool,
}

impl ResizeHandle {
    /// The handles a bounding box exposes
    pub const BOX: [ResizeHandle; 8] = [
        ResizeHandle::TopLeft,
        ResizeHandle::Top,
        ResizeHandle::TopRight,
        ResizeHandle::Right,
        ResizeHandle::BottomRight,
        ResizeHandle::Bottom,
        ResizeHandle::BottomLeft,
        ResizeHandle::Left,
    ];

    /// True for the line endpoint handles
    pub fn is_endpoint(self) -> bool {
        matches!(self, ResizeHandle::Start | ResizeHandle::End)
    }

    fn edges(self) -> Edges {
        let (left, top, right, bottom) = match self {
            ResizeHandle::TopLeft => (true, true, false, false),
            ResizeHandle::Top => (false, true, false, false),
            ResizeHandle::TopRight => (false, true, true, false),
            ResizeHandle::Right => (false, false, true, false),
            ResizeHandle::BottomRight => (false, false, true, true),
            ResizeHandle::Bottom => (false, false, false, true),
            ResizeHandle::BottomLeft => (true, false, false, true),
            ResizeHandle::Left => (true, false, false, false),
            ResizeHandle::Start | ResizeHandle::End => (false, false, false, false),
        };
        Edges { left, top, right, bottom }
    }
}

/// Resize `geometry` by dragging `handle` by (dx, dy).
///
/// Box shapes move the handle's edges, keeping the opposite edges fixed.
/// The result is floored at `min` (growing away from the fixed edge) and then
/// clamped into the grid: a moving edge that would cross the grid boundary is
/// stopped there, shrinking the box instead of translating it. Pass
/// [`Size::ZERO`] while a drag is in progress; floors are meant for commit.
///
/// Lines only react to `Start`/`End`, which relocate that endpoint. A handle
/// that does not belong to the geometry produces an empty update.
pub fn resize(
    geometry: &Geometry,
    handle: ResizeHandle,
    dx: f64,
    dy: f64,
    min: Size,
    grid: &Grid,
) -> GeometryUpdate {
    match geometry {
        Geometry::Box(b) => {
            if handle.is_endpoint() {
                return GeometryUpdate::default();
            }
            let edges = handle.edges();
            let (left, right) = resize_axis(
                b.x,
                b.right(),
                dx,
                edges.left,
                edges.right,
                min.width,
                grid.width,
            );
            let (top, bottom) = resize_axis(
                b.y,
                b.bottom(),
                dy,
                edges.top,
                edges.bottom,
                min.height,
                grid.height,
            );
            GeometryUpdate {
                x: Some(left),
                y: Some(top),
                width: Some(right - left),
                height: Some(bottom - top),
                ..Default::default()
            }
        }
        Geometry::Line(s) => match handle {
            ResizeHandle::Start => GeometryUpdate {
                x: Some(grid.clamp_x(s.x + dx)),
                y: Some(grid.clamp_y(s.y + dy)),
                ..Default::default()
            },
            ResizeHandle::End => GeometryUpdate {
                x2: Some(grid.clamp_x(s.x2 + dx)),
                y2: Some(grid.clamp_y(s.y2 + dy)),
                ..Default::default()
            },
            _ => GeometryUpdate::default(),
        },
    }
}

/// One axis of the box resize: returns the new (low, high) edge pair
fn resize_axis(
    low: f64,
    high: f64,
    delta: f64,
    moves_low: bool,
    moves_high: bool,
    min: f64,
    limit: f64,
) -> (f64, f64) {
    let min = min.max(0.0).min(limit);
    let mut low = if moves_low { low + delta } else { low };
    let mut high = if moves_high { high + delta } else { high };

    // Floor: grow away from the edge that stays put.
    if high - low < min {
        if moves_low {
            low = high - min;
        } else {
            high = low + min;
        }
    }

    // Clamp: a moving edge stops at the wall, a fixed one drags the box back.
    if low < 0.0 {
        if moves_low {
            low = 0.0;
        } else {
            high -= low;
            low = 0.0;
        }
    }
    if high > limit {
        if moves_high {
            high = limit;
        } else {
            low = (low - (high - limit)).max(0.0);
            high = limit;
        }
    }

    // Clamping may have eaten into the floor again.
    if high - low < min {
        high = (low + min).min(limit);
        low = (high - min).max(0.0);
    }
    (low, high)
}
