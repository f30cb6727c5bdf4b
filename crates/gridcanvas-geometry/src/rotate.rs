//! Drag rotation around a shape's center.

use crate::primitives::{Geometry, Point};

/// Pivot used for rotation: box center, or segment midpoint for lines
pub fn rotation_center(geometry: &Geometry) -> Point {
    match geometry {
        Geometry::Box(b) => b.center(),
        Geometry::Line(s) => s.midpoint(),
    }
}

/// Angle of the cursor around `center`, in radians
pub fn pointer_angle(center: Point, cursor: Point) -> f64 {
    (cursor.y - center.y).atan2(cursor.x - center.x)
}

/// Rotation in degrees after dragging from `start_angle` to `current_angle`.
///
/// The result is not wrapped; it may exceed +/-360 after several turns.
pub fn rotate(initial_rotation: f64, start_angle: f64, current_angle: f64) -> f64 {
    initial_rotation + (current_angle - start_angle).to_degrees()
}

/// Wrap degrees into `[0, 360)` - for display only
pub fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Bounds, Segment};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn centers() {
        let rect = Geometry::Box(Bounds::new(0.0, 0.0, 100.0, 50.0));
        assert_eq!(rotation_center(&rect), Point::new(50.0, 25.0));
        let line = Geometry::Line(Segment::new(Point::new(0.0, 0.0), Point::new(10.0, 20.0)));
        assert_eq!(rotation_center(&line), Point::new(5.0, 10.0));
    }

    #[test]
    fn quarter_turn_adds_ninety_degrees() {
        let center = Point::new(50.0, 50.0);
        let start = pointer_angle(center, Point::new(100.0, 50.0));
        let current = pointer_angle(center, Point::new(50.0, 100.0));
        assert!(approx(rotate(15.0, start, current), 105.0));
    }

    #[test]
    fn rotation_is_unbounded() {
        let r = rotate(350.0, 0.0, std::f64::consts::PI);
        assert!(approx(r, 530.0));
        assert!(approx(normalize_degrees(r), 170.0));
        assert!(approx(normalize_degrees(-90.0), 270.0));
    }
}
