//! Replicas converge no matter how deltas are ordered or repeated.

use gridcanvas_core::{Canvas, HolderId, Shape, ShapeId, ShapeStore, ShapeUpdate};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Move(f64, f64),
    Resize(f64),
    Raise(i64),
    Remove,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Add),
        (0.0..4000.0f64, 0.0..4000.0f64).prop_map(|(x, y)| Op::Move(x, y)),
        (20.0..500.0f64).prop_map(Op::Resize),
        (-10i64..10).prop_map(Op::Raise),
        Just(Op::Remove),
    ]
}

fn sorted(store: &ShapeStore) -> Vec<Shape> {
    let mut shapes: Vec<Shape> = store.all().into_iter().cloned().collect();
    shapes.sort_by(|a, b| a.id.cmp(&b.id));
    shapes
}

/// Apply `op` on `replica` and return the deltas it produced
fn run(store: &mut ShapeStore, replica: usize, op: &Op) -> Vec<Vec<u8>> {
    let shared = ShapeId::from("shared");
    match op {
        Op::Add(n) => {
            let id = format!("r{replica}-{n}");
            let _ = store.add(Shape::rect(id.as_str(), 10.0, 10.0, 40.0, 40.0));
        }
        Op::Move(x, y) => {
            let _ = store.update(&shared, &ShapeUpdate::position(*x, *y));
        }
        Op::Resize(w) => {
            let mut update = ShapeUpdate::default();
            update.geometry.width = Some(*w);
            let _ = store.update(&shared, &update);
        }
        Op::Raise(z) => {
            let _ = store.update(&shared, &ShapeUpdate::z_index(*z));
        }
        Op::Remove => {
            let _ = store.remove(&shared);
        }
    }
    store.take_outbound()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replicas_converge_under_any_delivery_order(
        ops in proptest::collection::vec((0usize..3, op()), 1..12),
        order in proptest::collection::vec(any::<u32>(), 64),
        dupes in proptest::collection::vec(any::<bool>(), 64),
    ) {
        let mut replicas: Vec<ShapeStore> = (0..3).map(|_| ShapeStore::new()).collect();

        // Everyone starts out knowing the shared shape
        replicas[0].add(Shape::rect("shared", 100.0, 100.0, 50.0, 50.0)).unwrap();
        let seed = replicas[0].take_outbound();
        for replica in replicas.iter_mut().skip(1) {
            for delta in &seed {
                replica.apply_remote(delta).unwrap();
            }
        }

        // Concurrent edits, nobody hears about anyone else yet
        let mut deltas = Vec::new();
        for (replica, op) in &ops {
            deltas.extend(run(&mut replicas[*replica], *replica, op));
        }

        // Every replica receives every delta, in its own shuffled order,
        // some of them twice
        for (r, replica) in replicas.iter_mut().enumerate() {
            let mut schedule: Vec<(u32, usize)> = (0..deltas.len())
                .map(|i| (order[(i + r * 7) % order.len()], i))
                .collect();
            schedule.sort();
            for (k, (_, i)) in schedule.iter().enumerate() {
                replica.apply_remote(&deltas[*i]).unwrap();
                if dupes[k % dupes.len()] {
                    prop_assert!(replica.apply_remote(&deltas[*i]).unwrap().is_empty());
                }
            }
        }

        let expected = sorted(&replicas[0]);
        for replica in &replicas[1..] {
            prop_assert_eq!(&sorted(replica), &expected);
        }
    }
}

#[test]
fn scenario_a_created_rect_reaches_other_client() {
    let mut client1 = Canvas::new(HolderId::from("A"));
    let mut client2 = Canvas::new(HolderId::from("B"));

    client1.add_shape(Shape::rect("s1", 100.0, 100.0, 50.0, 50.0)).unwrap();
    for delta in client1.take_outbound() {
        client2.apply_remote(&delta).unwrap();
    }

    let id = ShapeId::from("s1");
    assert_eq!(client2.get(&id), client1.get(&id));
    assert!(client2.get(&id).is_some());
}

#[test]
fn full_state_resync_is_idempotent() {
    let mut a = Canvas::new(HolderId::from("A"));
    let mut b = Canvas::new(HolderId::from("B"));
    a.add_shape(Shape::rect("s1", 0.0, 0.0, 30.0, 30.0)).unwrap();
    b.add_shape(Shape::rect("s2", 50.0, 50.0, 30.0, 30.0)).unwrap();

    let full_a = a.encode_full();
    let full_b = b.encode_full();
    a.apply_remote(&full_b).unwrap();
    b.apply_remote(&full_a).unwrap();
    // Replaying the same state again changes nothing
    assert!(a.apply_remote(&full_b).unwrap().is_empty());

    assert_eq!(sorted(a.store()), sorted(b.store()));
    assert_eq!(a.store().len(), 2);
}
