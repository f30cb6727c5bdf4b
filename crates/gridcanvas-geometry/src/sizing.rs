//! Type-specific size rules and creation-gesture commit.

use serde::{Deserialize, Serialize};

use crate::grid::{clamp_to_grid, Grid};
use crate::primitives::{Bounds, Geometry, GeometryUpdate, Point, Segment, Size};

/// Shape families the geometry engine knows sizing rules for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rect,
    Circle,
    Line,
    Text,
}

impl ShapeType {
    /// Smallest committed size a resize may produce
    pub fn resize_floor(self) -> Size {
        match self {
            ShapeType::Rect | ShapeType::Circle => Size::new(20.0, 20.0),
            ShapeType::Text => Size::new(50.0, 30.0),
            ShapeType::Line => Size::ZERO,
        }
    }

    /// A creation drag smaller than this is treated as a click.
    ///
    /// For lines only `width` is used, as a minimum segment length.
    pub fn creation_threshold(self) -> Size {
        match self {
            ShapeType::Rect | ShapeType::Circle => Size::new(10.0, 10.0),
            ShapeType::Text => Size::new(50.0, 30.0),
            ShapeType::Line => Size::new(10.0, 0.0),
        }
    }

    /// Size a click-created shape gets. Lines extend horizontally by `width`.
    pub fn default_size(self) -> Size {
        match self {
            ShapeType::Rect | ShapeType::Circle => Size::new(100.0, 100.0),
            ShapeType::Text => Size::new(200.0, 50.0),
            ShapeType::Line => Size::new(100.0, 0.0),
        }
    }

    pub fn is_box(self) -> bool {
        !matches!(self, ShapeType::Line)
    }
}

/// Turn a creation drag from `start` to `end` into committed geometry.
///
/// Undersized gestures are upgraded to the type's default size anchored at
/// `start` rather than discarded; the result is floored and clamped.
pub fn finalize_creation(shape_type: ShapeType, start: Point, end: Point, grid: &Grid) -> Geometry {
    let geometry = match shape_type {
        ShapeType::Line => {
            let mut segment = Segment::new(start, end);
            if segment.length() < shape_type.creation_threshold().width {
                segment = Segment::new(
                    start,
                    Point::new(start.x + shape_type.default_size().width, start.y),
                );
            }
            Geometry::Line(segment)
        }
        ShapeType::Rect | ShapeType::Circle | ShapeType::Text => {
            let threshold = shape_type.creation_threshold();
            let floor = shape_type.resize_floor();
            let mut bounds = Bounds::from_corners(start, end);
            if bounds.width < threshold.width || bounds.height < threshold.height {
                let size = shape_type.default_size();
                bounds = Bounds::new(start.x, start.y, size.width, size.height);
            }
            bounds.width = bounds.width.max(floor.width);
            bounds.height = bounds.height.max(floor.height);
            Geometry::Box(bounds)
        }
    };
    geometry.apply(&clamp_to_grid(GeometryUpdate::default(), &geometry, grid))
}
