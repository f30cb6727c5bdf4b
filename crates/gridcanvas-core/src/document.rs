//! Automerge document holding every shape of a canvas.
//!
//! Each shape is a map directly under the document root, keyed by shape id.
//! Keeping shapes at the root means two peers that start from empty
//! documents never race to create a shared container object.
//!
//! Every local write is one automerge change; the bytes of that change are
//! the delta that gets shipped to other replicas.

use automerge::transaction::{Transactable, Transaction};
use automerge::{
    Automerge, AutomergeError, ChangeHash, ObjId, ObjType, ReadDoc, ScalarValue, Value, ROOT,
};
use gridcanvas_geometry::{Bounds, Segment, ShapeType};
use tracing::warn;

use crate::error::{Error, Result};
use crate::shape::{HolderId, LockLease, Shape, ShapeId, ShapeKind, ShapeUpdate, TextBox};

const TYPE: &str = "type";
const X: &str = "x";
const Y: &str = "y";
const WIDTH: &str = "width";
const HEIGHT: &str = "height";
const X2: &str = "x2";
const Y2: &str = "y2";
const ROTATION: &str = "rotation";
const Z_INDEX: &str = "zIndex";
const TEXT: &str = "text";
const LOCKED_BY: &str = "lockedBy";
const LOCKED_AT: &str = "lockedAt";

/// The replicated shape document
#[derive(Debug, Clone)]
pub struct CanvasDoc {
    doc: Automerge,
}

impl CanvasDoc {
    pub fn new() -> Self {
        Self {
            doc: Automerge::new(),
        }
    }

    /// Hydrate from a full-state encoding
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Automerge::load(bytes).map_err(|e| Error::MalformedUpdate(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Full-state encoding, sufficient to rebuild an equivalent document
    pub fn save(&self) -> Vec<u8> {
        self.doc.save()
    }

    pub fn heads(&self) -> Vec<ChangeHash> {
        self.doc.get_heads()
    }

    /// Merge a delta or full state produced by any replica.
    ///
    /// Returns whether anything new was applied. Already-seen changes are a
    /// no-op, so the same bytes may be delivered any number of times.
    ///
    /// The whole buffer must parse. A buffer that is only partly valid is
    /// rejected without applying any of it.
    pub fn merge_bytes(&mut self, bytes: &[u8]) -> Result<bool> {
        // `load_incremental` keeps whatever prefix parses and drops the
        // rest. A standalone load fails on any unparsed tail; `MissingDeps`
        // only means the buffer parsed but builds on changes it doesn't carry.
        match Automerge::load(bytes) {
            Ok(_) | Err(AutomergeError::MissingDeps) => {}
            Err(e) => return Err(Error::MalformedUpdate(e.to_string())),
        }

        let before = self.doc.get_heads();
        self.doc
            .load_incremental(bytes)
            .map_err(|e| Error::MalformedUpdate(e.to_string()))?;
        Ok(self.doc.get_heads() != before)
    }

    pub fn insert_shape(&mut self, shape: &Shape) -> Result<Option<Vec<u8>>> {
        self.edit(|tx| write_shape(tx, shape))
    }

    pub fn update_shape(&mut self, id: &ShapeId, update: &ShapeUpdate) -> Result<Option<Vec<u8>>> {
        self.edit(|tx| write_update(tx, id, update))
    }

    /// Several updates as one change
    pub fn update_shapes(&mut self, updates: &[(ShapeId, ShapeUpdate)]) -> Result<Option<Vec<u8>>> {
        self.edit(|tx| {
            for (id, update) in updates {
                write_update(tx, id, update)?;
            }
            Ok(())
        })
    }

    pub fn set_lock(&mut self, id: &ShapeId, lease: Option<&LockLease>) -> Result<Option<Vec<u8>>> {
        self.edit(|tx| {
            let obj = shape_obj(&*tx, id)?.ok_or_else(|| Error::ShapeNotFound(id.clone()))?;
            write_lock(tx, &obj, lease)
        })
    }

    pub fn delete_shape(&mut self, id: &ShapeId) -> Result<Option<Vec<u8>>> {
        self.edit(|tx| {
            tx.delete(ROOT, id.as_str())?;
            Ok(())
        })
    }

    pub fn read_shape(&self, id: &ShapeId) -> Result<Option<Shape>> {
        match shape_obj(&self.doc, id)? {
            Some(obj) => read_shape(&self.doc, id.as_str(), &obj).map(Some),
            None => Ok(None),
        }
    }

    /// Every valid shape in the document. Records that don't parse are
    /// skipped with a warning.
    pub fn read_all_shapes(&self) -> Result<Vec<Shape>> {
        let keys: Vec<String> = self.doc.keys(ROOT).collect();
        let mut shapes = Vec::with_capacity(keys.len());
        for key in keys {
            let Some((Value::Object(ObjType::Map), obj)) = self.doc.get(ROOT, key.as_str())? else {
                continue;
            };
            match read_shape(&self.doc, &key, &obj) {
                Ok(shape) => shapes.push(shape),
                Err(e) => warn!(shape = %key, error = %e, "skipping invalid shape record"),
            }
        }
        Ok(shapes)
    }

    /// Run `f` as one transaction and return the resulting change, if any
    fn edit<F>(&mut self, f: F) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        let before = self.doc.get_heads();
        let mut tx = self.doc.transaction();
        if let Err(e) = f(&mut tx) {
            tx.rollback();
            return Err(e);
        }
        tx.commit();

        if self.doc.get_heads() == before {
            return Ok(None);
        }
        Ok(Some(self.doc.save_after(&before)))
    }
}

impl Default for CanvasDoc {
    fn default() -> Self {
        Self::new()
    }
}

fn type_to_str(shape_type: ShapeType) -> &'static str {
    match shape_type {
        ShapeType::Rect => "rect",
        ShapeType::Circle => "circle",
        ShapeType::Line => "line",
        ShapeType::Text => "text",
    }
}

fn str_to_type(s: &str) -> Option<ShapeType> {
    match s {
        "rect" => Some(ShapeType::Rect),
        "circle" => Some(ShapeType::Circle),
        "line" => Some(ShapeType::Line),
        "text" => Some(ShapeType::Text),
        _ => None,
    }
}

fn shape_obj<R: ReadDoc>(doc: &R, id: &ShapeId) -> Result<Option<ObjId>> {
    match doc.get(ROOT, id.as_str())? {
        Some((Value::Object(ObjType::Map), obj)) => Ok(Some(obj)),
        _ => Ok(None),
    }
}

fn write_shape<T: Transactable>(tx: &mut T, shape: &Shape) -> Result<()> {
    let obj = tx.put_object(ROOT, shape.id.as_str(), ObjType::Map)?;
    tx.put(&obj, TYPE, type_to_str(shape.shape_type()))?;
    match &shape.kind {
        ShapeKind::Rect(b) | ShapeKind::Circle(b) => write_bounds(tx, &obj, b)?,
        ShapeKind::Text(t) => {
            write_bounds(tx, &obj, &t.bounds)?;
            tx.put(&obj, TEXT, t.text.as_str())?;
        }
        ShapeKind::Line(s) => {
            tx.put(&obj, X, s.x)?;
            tx.put(&obj, Y, s.y)?;
            tx.put(&obj, X2, s.x2)?;
            tx.put(&obj, Y2, s.y2)?;
        }
    }
    tx.put(&obj, ROTATION, shape.rotation)?;
    tx.put(&obj, Z_INDEX, shape.z_index)?;
    write_lock(tx, &obj, shape.lock.as_ref())
}

fn write_bounds<T: Transactable>(tx: &mut T, obj: &ObjId, b: &Bounds) -> Result<()> {
    tx.put(obj, X, b.x)?;
    tx.put(obj, Y, b.y)?;
    tx.put(obj, WIDTH, b.width)?;
    tx.put(obj, HEIGHT, b.height)?;
    Ok(())
}

fn write_lock<T: Transactable>(tx: &mut T, obj: &ObjId, lease: Option<&LockLease>) -> Result<()> {
    match lease {
        Some(lease) => {
            tx.put(obj, LOCKED_BY, lease.holder.as_str())?;
            tx.put(obj, LOCKED_AT, lease.acquired_at as i64)?;
        }
        None => {
            tx.put(obj, LOCKED_BY, ScalarValue::Null)?;
            tx.put(obj, LOCKED_AT, ScalarValue::Null)?;
        }
    }
    Ok(())
}

/// Write only the fields present in `update` that belong to the shape's kind.
/// A shape deleted concurrently is left alone.
fn write_update<T: Transactable + ReadDoc>(
    tx: &mut T,
    id: &ShapeId,
    update: &ShapeUpdate,
) -> Result<()> {
    let Some(obj) = shape_obj(&*tx, id)? else {
        return Ok(());
    };
    let Some(shape_type) = get_string(&*tx, &obj, TYPE)?.as_deref().and_then(str_to_type) else {
        return Err(Error::InvalidRecord {
            id: id.to_string(),
            reason: "missing or unknown type".into(),
        });
    };

    let g = &update.geometry;
    let mut fields: Vec<(&str, Option<f64>)> = vec![(X, g.x), (Y, g.y)];
    if shape_type.is_box() {
        fields.extend([(WIDTH, g.width), (HEIGHT, g.height)]);
    } else {
        fields.extend([(X2, g.x2), (Y2, g.y2)]);
    }
    fields.push((ROTATION, update.rotation));
    for (key, value) in fields {
        if let Some(v) = value {
            tx.put(&obj, key, v)?;
        }
    }
    if let Some(z) = update.z_index {
        tx.put(&obj, Z_INDEX, z)?;
    }
    if let (ShapeType::Text, Some(text)) = (shape_type, &update.text) {
        tx.put(&obj, TEXT, text.as_str())?;
    }
    Ok(())
}

fn read_shape<R: ReadDoc>(doc: &R, id: &str, obj: &ObjId) -> Result<Shape> {
    let invalid = |reason: &str| Error::InvalidRecord {
        id: id.to_string(),
        reason: reason.to_string(),
    };
    let require = |key: &str| -> Result<f64> {
        get_f64(doc, obj, key)?.ok_or_else(|| invalid(&format!("missing {key}")))
    };

    let shape_type = get_string(doc, obj, TYPE)?
        .as_deref()
        .and_then(str_to_type)
        .ok_or_else(|| invalid("missing or unknown type"))?;

    let kind = match shape_type {
        ShapeType::Line => ShapeKind::Line(Segment {
            x: require(X)?,
            y: require(Y)?,
            x2: require(X2)?,
            y2: require(Y2)?,
        }),
        ShapeType::Rect | ShapeType::Circle | ShapeType::Text => {
            let bounds = Bounds::new(require(X)?, require(Y)?, require(WIDTH)?, require(HEIGHT)?);
            match shape_type {
                ShapeType::Rect => ShapeKind::Rect(bounds),
                ShapeType::Circle => ShapeKind::Circle(bounds),
                _ => ShapeKind::Text(TextBox {
                    bounds,
                    text: get_string(doc, obj, TEXT)?.unwrap_or_default(),
                }),
            }
        }
    };

    let lock = get_string(doc, obj, LOCKED_BY)?.map(|holder| LockLease {
        holder: HolderId(holder),
        acquired_at: 0,
    });
    let lock = match lock {
        Some(mut lease) => {
            lease.acquired_at = get_i64(doc, obj, LOCKED_AT)?.unwrap_or(0).max(0) as u64;
            Some(lease)
        }
        None => None,
    };

    Ok(Shape {
        id: ShapeId::from(id),
        kind,
        rotation: get_f64(doc, obj, ROTATION)?.unwrap_or(0.0),
        z_index: get_i64(doc, obj, Z_INDEX)?.unwrap_or(0),
        lock,
    })
}

fn get_scalar<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> Result<Option<ScalarValue>> {
    match doc.get(obj, key)? {
        Some((Value::Scalar(s), _)) => Ok(Some(s.into_owned())),
        _ => Ok(None),
    }
}

fn get_f64<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> Result<Option<f64>> {
    Ok(match get_scalar(doc, obj, key)? {
        Some(ScalarValue::F64(n)) => Some(n),
        Some(ScalarValue::Int(n)) => Some(n as f64),
        Some(ScalarValue::Uint(n)) => Some(n as f64),
        _ => None,
    })
}

fn get_i64<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> Result<Option<i64>> {
    Ok(match get_scalar(doc, obj, key)? {
        Some(ScalarValue::Int(n)) => Some(n),
        Some(ScalarValue::Uint(n)) => Some(n as i64),
        Some(ScalarValue::F64(n)) => Some(n as i64),
        _ => None,
    })
}

fn get_string<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> Result<Option<String>> {
    Ok(match get_scalar(doc, obj, key)? {
        Some(ScalarValue::Str(s)) => Some(s.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcanvas_geometry::{GeometryUpdate, Point};

    fn text_shape() -> Shape {
        Shape::new(
            ShapeId::from("t1"),
            ShapeKind::Text(TextBox {
                bounds: Bounds::new(5.0, 6.0, 200.0, 50.0),
                text: "hello".into(),
            }),
        )
        .with_z(4)
    }

    #[test]
    fn test_insert_and_read_back() {
        let mut doc = CanvasDoc::new();
        let shape = text_shape();
        let delta = doc.insert_shape(&shape).unwrap();
        assert!(delta.is_some());
        assert_eq!(doc.read_shape(&shape.id).unwrap(), Some(shape));
    }

    #[test]
    fn test_update_writes_only_matching_fields() {
        let mut doc = CanvasDoc::new();
        let line = Shape::new(
            ShapeId::from("l1"),
            ShapeKind::Line(Segment::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0))),
        );
        doc.insert_shape(&line).unwrap();

        let update = ShapeUpdate {
            geometry: GeometryUpdate {
                width: Some(50.0),
                x2: Some(20.0),
                ..Default::default()
            },
            ..Default::default()
        };
        doc.update_shape(&line.id, &update).unwrap();

        let read = doc.read_shape(&line.id).unwrap().unwrap();
        let expected = Segment::new(Point::new(0.0, 0.0), Point::new(20.0, 10.0));
        assert_eq!(read.kind, ShapeKind::Line(expected));
    }

    #[test]
    fn test_lock_round_trips_through_null() {
        let mut doc = CanvasDoc::new();
        let shape = text_shape();
        doc.insert_shape(&shape).unwrap();

        let lease = LockLease {
            holder: HolderId::from("A"),
            acquired_at: 1234,
        };
        doc.set_lock(&shape.id, Some(&lease)).unwrap();
        assert_eq!(doc.read_shape(&shape.id).unwrap().unwrap().lock, Some(lease));

        doc.set_lock(&shape.id, None).unwrap();
        assert_eq!(doc.read_shape(&shape.id).unwrap().unwrap().lock, None);
    }

    #[test]
    fn test_lock_on_missing_shape_fails() {
        let mut doc = CanvasDoc::new();
        let err = doc.set_lock(&ShapeId::from("nope"), None).unwrap_err();
        assert!(matches!(err, Error::ShapeNotFound(_)));
        assert!(doc.heads().is_empty());
    }

    #[test]
    fn test_delta_applies_on_other_replica() {
        let mut a = CanvasDoc::new();
        let mut b = CanvasDoc::new();
        let delta = a.insert_shape(&text_shape()).unwrap().unwrap();

        assert!(b.merge_bytes(&delta).unwrap());
        // Second delivery is a no-op
        assert!(!b.merge_bytes(&delta).unwrap());
        assert_eq!(b.read_all_shapes().unwrap(), a.read_all_shapes().unwrap());
    }

    #[test]
    fn test_full_state_rebuilds_document() {
        let mut a = CanvasDoc::new();
        a.insert_shape(&text_shape()).unwrap();
        a.insert_shape(&Shape::rect("r1", 0.0, 0.0, 30.0, 30.0)).unwrap();

        let loaded = CanvasDoc::load(&a.save()).unwrap();
        let mut left = a.read_all_shapes().unwrap();
        let mut right = loaded.read_all_shapes().unwrap();
        left.sort_by(|x, y| x.id.cmp(&y.id));
        right.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(left, right);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let mut doc = CanvasDoc::new();
        let err = doc.merge_bytes(b"definitely not automerge").unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate(_)));
    }

    #[test]
    fn test_malformed_rejected_on_document_with_history() {
        let mut server = CanvasDoc::new();
        server.insert_shape(&Shape::rect("s1", 10.0, 10.0, 50.0, 50.0)).unwrap();
        let mut peer = CanvasDoc::load(&server.save()).unwrap();
        let id = ShapeId::from("s1");
        let before = server.read_shape(&id).unwrap();

        let err = server.merge_bytes(b"definitely not automerge").unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate(_)));

        let update = ShapeUpdate {
            geometry: GeometryUpdate {
                x: Some(5.0),
                y: Some(5.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let delta = peer.update_shape(&id, &update).unwrap().unwrap();
        let mut tainted = delta.clone();
        tainted.extend_from_slice(b"trailing garbage bytes");

        let heads = server.heads();
        let err = server.merge_bytes(&tainted).unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate(_)));
        assert_eq!(server.heads(), heads);
        assert_eq!(server.read_shape(&id).unwrap(), before);

        // The clean delta still applies
        assert!(server.merge_bytes(&delta).unwrap());
        assert_eq!(server.read_shape(&id).unwrap(), peer.read_shape(&id).unwrap());
    }

    #[test]
    fn test_empty_update_produces_no_change() {
        let mut doc = CanvasDoc::new();
        doc.insert_shape(&text_shape()).unwrap();
        let delta = doc.update_shape(&ShapeId::from("t1"), &ShapeUpdate::default()).unwrap();
        assert!(delta.is_none());
    }
}
