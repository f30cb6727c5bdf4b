use serde::{Deserialize, Serialize};

/// A point in canonical document coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Width/height pair, used for minimum and default sizes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    /// No floor at all - what a drag in progress uses
    pub const ZERO: Size = Size { width: 0.0, height: 0.0 };

    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Top-left anchored bounding box (rect, circle, text)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Build a box from two opposite corners in any order
    pub fn from_corners(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self {
            x,
            y,
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Line segment from (x, y) to (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Segment {
    pub x: f64,
    pub y: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Segment {
    pub fn new(start: Point, end: Point) -> Self {
        Self {
            x: start.x,
            y: start.y,
            x2: end.x,
            y2: end.y,
        }
    }

    pub fn start(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn end(&self) -> Point {
        Point::new(self.x2, self.y2)
    }

    pub fn midpoint(&self) -> Point {
        Point::new((self.x + self.x2) / 2.0, (self.y + self.y2) / 2.0)
    }

    pub fn length(&self) -> f64 {
        (self.x2 - self.x).hypot(self.y2 - self.y)
    }
}

/// The position-bearing part of a shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Box(Bounds),
    Line(Segment),
}

impl Geometry {
    /// Overlay a partial update onto this geometry.
    ///
    /// Fields that do not belong to the geometry's kind (`x2` on a box,
    /// `width` on a line) are ignored.
    pub fn apply(&self, update: &GeometryUpdate) -> Geometry {
        match self {
            Geometry::Box(b) => Geometry::Box(Bounds {
                x: update.x.unwrap_or(b.x),
                y: update.y.unwrap_or(b.y),
                width: update.width.unwrap_or(b.width),
                height: update.height.unwrap_or(b.height),
            }),
            Geometry::Line(s) => Geometry::Line(Segment {
                x: update.x.unwrap_or(s.x),
                y: update.y.unwrap_or(s.y),
                x2: update.x2.unwrap_or(s.x2),
                y2: update.y2.unwrap_or(s.y2),
            }),
        }
    }

    /// Full update that turns any geometry of the same kind into `self`
    pub fn to_update(&self) -> GeometryUpdate {
        match self {
            Geometry::Box(b) => GeometryUpdate {
                x: Some(b.x),
                y: Some(b.y),
                width: Some(b.width),
                height: Some(b.height),
                ..Default::default()
            },
            Geometry::Line(s) => GeometryUpdate {
                x: Some(s.x),
                y: Some(s.y),
                x2: Some(s.x2),
                y2: Some(s.y2),
                ..Default::default()
            },
        }
    }
}

/// Partial geometry write; `None` leaves the field untouched
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeometryUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<f64>,
}

impl GeometryUpdate {
    pub fn is_empty(&self) -> bool {
        *self == GeometryUpdate::default()
    }

    /// Fields of `other` win over fields of `self`
    pub fn merged(self, other: GeometryUpdate) -> GeometryUpdate {
        GeometryUpdate {
            x: other.x.or(self.x),
            y: other.y.or(self.y),
            width: other.width.or(self.width),
            height: other.height.or(self.height),
            x2: other.x2.or(self.x2),
            y2: other.y2.or(self.y2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_normalizes_drag_direction() {
        let b = Bounds::from_corners(Point::new(150.0, 80.0), Point::new(100.0, 120.0));
        assert_eq!(b, Bounds::new(100.0, 80.0, 50.0, 40.0));
    }

    #[test]
    fn apply_ignores_foreign_fields() {
        let line = Geometry::Line(Segment::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)));
        let update = GeometryUpdate {
            width: Some(99.0),
            x2: Some(20.0),
            ..Default::default()
        };
        assert_eq!(
            line.apply(&update),
            Geometry::Line(Segment::new(Point::new(0.0, 0.0), Point::new(20.0, 10.0)))
        );
    }

    #[test]
    fn merged_prefers_later_fields() {
        let a = GeometryUpdate { x: Some(1.0), y: Some(2.0), ..Default::default() };
        let b = GeometryUpdate { y: Some(5.0), ..Default::default() };
        let m = a.merged(b);
        assert_eq!(m.x, Some(1.0));
        assert_eq!(m.y, Some(5.0));
    }
}
