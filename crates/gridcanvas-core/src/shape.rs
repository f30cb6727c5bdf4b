//! Shape records and partial updates.

use gridcanvas_geometry::{Bounds, Geometry, GeometryUpdate, Segment, ShapeType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shape identifier - UUID string, unique across all peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(pub String);

impl ShapeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ShapeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShapeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShapeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque identity of whoever holds a lock (a user, a session)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(pub String);

impl HolderId {
    /// Fresh random holder, for sessions without a user identity
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HolderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Text box: bounds plus content
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextBox {
    #[serde(flatten)]
    pub bounds: Bounds,
    #[serde(default)]
    pub text: String,
}

/// Type-specific payload of a shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeKind {
    Rect(Bounds),
    Circle(Bounds),
    Line(Segment),
    Text(TextBox),
}

impl ShapeKind {
    pub fn shape_type(&self) -> ShapeType {
        match self {
            ShapeKind::Rect(_) => ShapeType::Rect,
            ShapeKind::Circle(_) => ShapeType::Circle,
            ShapeKind::Line(_) => ShapeType::Line,
            ShapeKind::Text(_) => ShapeType::Text,
        }
    }

    pub fn geometry(&self) -> Geometry {
        match self {
            ShapeKind::Rect(b) | ShapeKind::Circle(b) => Geometry::Box(*b),
            ShapeKind::Text(t) => Geometry::Box(t.bounds),
            ShapeKind::Line(s) => Geometry::Line(*s),
        }
    }

    /// Replace the geometry. A geometry of the wrong family is ignored.
    pub fn set_geometry(&mut self, geometry: Geometry) {
        match (self, geometry) {
            (ShapeKind::Rect(b) | ShapeKind::Circle(b), Geometry::Box(new)) => *b = new,
            (ShapeKind::Text(t), Geometry::Box(new)) => t.bounds = new,
            (ShapeKind::Line(s), Geometry::Line(new)) => *s = new,
            _ => {}
        }
    }

    /// Build a kind of the given type around committed geometry
    pub fn from_geometry(shape_type: ShapeType, geometry: Geometry) -> Option<Self> {
        match (shape_type, geometry) {
            (ShapeType::Rect, Geometry::Box(b)) => Some(ShapeKind::Rect(b)),
            (ShapeType::Circle, Geometry::Box(b)) => Some(ShapeKind::Circle(b)),
            (ShapeType::Text, Geometry::Box(bounds)) => Some(ShapeKind::Text(TextBox {
                bounds,
                text: String::new(),
            })),
            (ShapeType::Line, Geometry::Line(s)) => Some(ShapeKind::Line(s)),
            _ => None,
        }
    }
}

/// Advisory edit lease on a shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    #[serde(rename = "lockedBy")]
    pub holder: HolderId,
    /// Milliseconds since the Unix epoch when the lease was first granted
    #[serde(rename = "lockedAt")]
    pub acquired_at: u64,
}

impl LockLease {
    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.acquired_at) > ttl_ms
    }
}

/// A shape on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: ShapeId,
    #[serde(flatten)]
    pub kind: ShapeKind,
    /// Degrees, unbounded
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i64,
    #[serde(flatten)]
    pub lock: Option<LockLease>,
}

impl Shape {
    pub fn new(id: ShapeId, kind: ShapeKind) -> Self {
        Self {
            id,
            kind,
            rotation: 0.0,
            z_index: 0,
            lock: None,
        }
    }

    pub fn rect(id: impl Into<ShapeId>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(id.into(), ShapeKind::Rect(Bounds::new(x, y, width, height)))
    }

    pub fn with_z(mut self, z_index: i64) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn shape_type(&self) -> ShapeType {
        self.kind.shape_type()
    }

    pub fn geometry(&self) -> Geometry {
        self.kind.geometry()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ShapeKind::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    /// Overlay an update. Fields that don't apply to this kind are ignored.
    pub fn apply(&mut self, update: &ShapeUpdate) {
        if !update.geometry.is_empty() {
            let geometry = self.geometry().apply(&update.geometry);
            self.kind.set_geometry(geometry);
        }
        if let Some(rotation) = update.rotation {
            self.rotation = rotation;
        }
        if let Some(z) = update.z_index {
            self.z_index = z;
        }
        if let (ShapeKind::Text(t), Some(text)) = (&mut self.kind, &update.text) {
            t.text.clone_from(text);
        }
    }
}

/// Partial shape write; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeUpdate {
    #[serde(flatten)]
    pub geometry: GeometryUpdate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ShapeUpdate {
    pub fn geometry(geometry: GeometryUpdate) -> Self {
        Self {
            geometry,
            ..Default::default()
        }
    }

    pub fn position(x: f64, y: f64) -> Self {
        Self::geometry(GeometryUpdate {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        })
    }

    pub fn z_index(z: i64) -> Self {
        Self {
            z_index: Some(z),
            ..Default::default()
        }
    }

    pub fn rotation(degrees: f64) -> Self {
        Self {
            rotation: Some(degrees),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ShapeUpdate::default()
    }

    /// The subset of this update that would actually change `shape`.
    ///
    /// Fields equal to the current value and fields foreign to the shape's
    /// kind are dropped, so the document only sees real changes.
    pub fn changes_from(&self, shape: &Shape) -> ShapeUpdate {
        let mut next = shape.clone();
        next.apply(self);

        let before = shape.geometry().to_update();
        let after = next.geometry().to_update();
        let pick = |old: Option<f64>, new: Option<f64>| if old != new { new } else { None };

        ShapeUpdate {
            geometry: GeometryUpdate {
                x: pick(before.x, after.x),
                y: pick(before.y, after.y),
                width: pick(before.width, after.width),
                height: pick(before.height, after.height),
                x2: pick(before.x2, after.x2),
                y2: pick(before.y2, after.y2),
            },
            rotation: (next.rotation != shape.rotation).then_some(next.rotation),
            z_index: (next.z_index != shape.z_index).then_some(next.z_index),
            text: (next.text() != shape.text())
                .then(|| next.text().unwrap_or_default().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcanvas_geometry::Point;

    #[test]
    fn test_shape_json_shape() {
        let shape = Shape::rect("s1", 10.0, 20.0, 100.0, 50.0).with_z(3);
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json["type"], "rect");
        assert_eq!(json["x"], 10.0);
        assert_eq!(json["zIndex"], 3);
        assert!(json.get("lockedBy").is_none());

        let back: Shape = serde_json::from_value(json).unwrap();
        assert_eq!(back, shape);
    }

    #[test]
    fn test_locked_text_from_json() {
        let json = r#"{"id":"t","type":"text","x":1,"y":2,"width":60,"height":40,
            "text":"hi","zIndex":0,"lockedBy":"A","lockedAt":1000}"#;
        let shape: Shape = serde_json::from_str(json).unwrap();
        assert_eq!(shape.text(), Some("hi"));
        assert_eq!(
            shape.lock,
            Some(LockLease {
                holder: HolderId::from("A"),
                acquired_at: 1000
            })
        );
    }

    #[test]
    fn test_apply_ignores_foreign_fields() {
        let mut line = Shape::new(
            ShapeId::from("l"),
            ShapeKind::Line(Segment::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0))),
        );
        let update = ShapeUpdate {
            geometry: GeometryUpdate {
                width: Some(99.0),
                x2: Some(30.0),
                ..Default::default()
            },
            text: Some("ignored".into()),
            ..Default::default()
        };
        line.apply(&update);
        assert_eq!(
            line.geometry(),
            Geometry::Line(Segment::new(Point::new(0.0, 0.0), Point::new(30.0, 0.0)))
        );
        assert_eq!(line.text(), None);
    }

    #[test]
    fn test_update_json_is_flat() {
        let update: ShapeUpdate = serde_json::from_str(r#"{"x":5,"zIndex":2}"#).unwrap();
        assert_eq!(update.geometry.x, Some(5.0));
        assert_eq!(update.z_index, Some(2));
        assert!(update.rotation.is_none());
        assert!(!update.is_empty());
        assert!(ShapeUpdate::default().is_empty());
    }

    #[test]
    fn test_changes_from_drops_no_op_fields() {
        let shape = Shape::rect("s", 10.0, 10.0, 100.0, 100.0).with_z(2);
        let update = ShapeUpdate {
            geometry: GeometryUpdate {
                x: Some(10.0),
                y: Some(15.0),
                x2: Some(3.0),
                ..Default::default()
            },
            z_index: Some(2),
            rotation: Some(45.0),
            ..Default::default()
        };
        let changes = update.changes_from(&shape);
        assert_eq!(changes.geometry.x, None);
        assert_eq!(changes.geometry.y, Some(15.0));
        assert_eq!(changes.geometry.x2, None);
        assert_eq!(changes.z_index, None);
        assert_eq!(changes.rotation, Some(45.0));
        assert!(ShapeUpdate::position(10.0, 10.0).changes_from(&shape).is_empty());
    }

    #[test]
    fn test_lease_expiry() {
        let lease = LockLease {
            holder: HolderId::from("A"),
            acquired_at: 1_000,
        };
        assert!(!lease.is_expired(30_999, 30_000));
        assert!(lease.is_expired(31_000, 30_000));
        // Clock skew never underflows
        assert!(!lease.is_expired(0, 30_000));
    }
}
