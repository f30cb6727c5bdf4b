//! Z-order reassignment.

use serde::{Deserialize, Serialize};

/// Layering operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZOrderOp {
    BringToFront,
    SendToBack,
    BringForward,
    SendBackward,
}

/// Compute new z-index assignments for `target`.
///
/// `layers` lists every shape's `(id, z_index)` in insertion order; equal
/// z-indices are ordered by that insertion order. Only changed assignments are
/// returned, so an empty result means the operation is a no-op (target
/// missing, or forward/backward already at the relevant extreme).
///
/// Front/back always assign `max + 1` / `min - 1`, even to a shape that is
/// already on top or at the bottom.
///
/// Forward/backward swap with the immediate neighbour. When the neighbour
/// shares the target's z-index, swapping would change nothing, so the target
/// is moved one step past it instead.
pub fn reorder<K: Clone + PartialEq>(
    layers: &[(K, i64)],
    op: ZOrderOp,
    target: &K,
) -> Vec<(K, i64)> {
    let mut sorted: Vec<&(K, i64)> = layers.iter().collect();
    // Stable: ties keep insertion order.
    sorted.sort_by_key(|(_, z)| *z);

    let Some(pos) = sorted.iter().position(|(id, _)| id == target) else {
        return Vec::new();
    };
    let z = sorted[pos].1;
    let last = sorted.len() - 1;

    match op {
        ZOrderOp::BringToFront => vec![(target.clone(), sorted[last].1 + 1)],
        ZOrderOp::SendToBack => vec![(target.clone(), sorted[0].1 - 1)],
        ZOrderOp::BringForward => {
            if pos == last {
                return Vec::new();
            }
            let (neighbor, nz) = sorted[pos + 1];
            if *nz == z {
                vec![(target.clone(), z + 1)]
            } else {
                vec![(target.clone(), *nz), (neighbor.clone(), z)]
            }
        }
        ZOrderOp::SendBackward => {
            if pos == 0 {
                return Vec::new();
            }
            let (neighbor, nz) = sorted[pos - 1];
            if *nz == z {
                vec![(target.clone(), z - 1)]
            } else {
                vec![(target.clone(), *nz), (neighbor.clone(), z)]
            }
        }
    }
}
