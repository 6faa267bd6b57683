//! Order-independent integer pairing used as the secondary key of edges.
//!
//! The key of an edge is the Cantor pairing of its endpoint global ids with
//! the smaller id first, so every rank that discovers the same edge, through
//! whichever cell, computes the same key.

use crate::mesh_error::MeshDecompError;

/// Cantor pairing `π(a, b) = (a + b)(a + b + 1)/2 + b`.
pub fn cantor_pairing(a: u64, b: u64) -> Result<u64, MeshDecompError> {
    let s = a as u128 + b as u128;
    let value = s * (s + 1) / 2 + b as u128;
    u64::try_from(value).map_err(|_| MeshDecompError::IdOverflow(a, b))
}

/// Secondary key of the edge between two vertices with global ids `id0`, `id1`.
pub fn edge_secondary_key(id0: u64, id1: u64) -> Result<u64, MeshDecompError> {
    cantor_pairing(id0.min(id1), id0.max(id1))
}

/// Global key of a vertex set, pairing the sorted ids left to right.
pub fn sorted_ids_key(ids: &[u64]) -> Result<u64, MeshDecompError> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    let mut iter = sorted.into_iter();
    let first = iter.next().ok_or_else(|| {
        MeshDecompError::InvariantViolation("cannot key an empty vertex set".into())
    })?;
    iter.try_fold(first, cantor_pairing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_values() {
        assert_eq!(cantor_pairing(0, 0).unwrap(), 0);
        assert_eq!(cantor_pairing(1, 0).unwrap(), 1);
        assert_eq!(cantor_pairing(0, 1).unwrap(), 2);
        assert_eq!(cantor_pairing(3, 5).unwrap(), 41);
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(
            cantor_pairing(u64::MAX, 1),
            Err(MeshDecompError::IdOverflow(u64::MAX, 1))
        );
    }

    proptest! {
        #[test]
        fn edge_key_ignores_endpoint_order(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            prop_assert_eq!(edge_secondary_key(a, b).unwrap(), edge_secondary_key(b, a).unwrap());
        }

        #[test]
        fn distinct_edges_get_distinct_keys(
            a in 0u64..10_000, b in 0u64..10_000, c in 0u64..10_000, d in 0u64..10_000
        ) {
            let same_edge = (a.min(b), a.max(b)) == (c.min(d), c.max(d));
            let same_key = edge_secondary_key(a, b).unwrap() == edge_secondary_key(c, d).unwrap();
            prop_assert_eq!(same_edge, same_key);
        }
    }
}
