//! Fixed, versioned, little-endian wire records for node id assignment and
//! shared-entity ownership.
//!
//! All multi-byte integers are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`, so buffers can be cast with `bytemuck` on any host.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received buffer into owned records, checking the length first.
pub fn decode_records<T: Pod + Zeroable>(data: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if data.len() % width != 0 {
        return Err(format!(
            "buffer of {} bytes is not a multiple of the {width}-byte record",
            data.len()
        ));
    }
    let mut out = vec![T::zeroed(); data.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(data);
    Ok(out)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 2;

/// Number of records that follow in the next message.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// What a rank contributes to an all-gather: how many requests it owns, the
/// largest vertex id present in its part of the mesh, and whether its part of
/// the pass failed.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireRankSummary {
    pub version_le: u16,
    pub status: u8,
    pub _pad: [u8; 5],
    pub owned_le: u64,
    pub max_id_le: u64,
}
impl WireRankSummary {
    pub const OK: u8 = 0;
    pub const FAILED: u8 = 1;

    pub fn new(owned: usize, max_id: u64) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            status: Self::OK,
            _pad: [0; 5],
            owned_le: (owned as u64).to_le(),
            max_id_le: max_id.to_le(),
        }
    }
    /// Summary of a rank whose part of the pass failed before the exchange.
    pub fn failed(max_id: u64) -> Self {
        Self {
            status: Self::FAILED,
            ..Self::new(0, max_id)
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn is_failed(&self) -> bool {
        self.status != Self::OK
    }
    pub fn owned(&self) -> u64 {
        u64::from_le(self.owned_le)
    }
    pub fn max_id(&self) -> u64 {
        u64::from_le(self.max_id_le)
    }
}

/// Globally meaningful key of a node request: the global id of its parent
/// background entity, the entity rank and the secondary key.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireRequestKey {
    pub parent_id_le: u64,
    pub secondary_le: u64,
    pub rank_le: u32,
    pub _pad: u32,
}
impl WireRequestKey {
    pub const SIZE: usize = 24;
    pub fn new(parent_id: u64, secondary: u64, entity_rank: u8) -> Self {
        Self {
            parent_id_le: parent_id.to_le(),
            secondary_le: secondary.to_le(),
            rank_le: (entity_rank as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn decode(&self) -> (u64, u64, u8) {
        (
            u64::from_le(self.parent_id_le),
            u64::from_le(self.secondary_le),
            u32::from_le(self.rank_le) as u8,
        )
    }
}

/// Reply to a [`WireRequestKey`]; [`WireNodeId::UNKNOWN`] when the owner has no
/// such request.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNodeId {
    pub id_le: u64,
}
impl WireNodeId {
    pub const UNKNOWN: u64 = u64::MAX;
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> Option<u64> {
        let id = u64::from_le(self.id_le);
        (id != Self::UNKNOWN).then_some(id)
    }
}

/// Owner a rank assigns to one of its boundary entities, addressed by the
/// entity's global id and rank.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEntityOwner {
    pub id_le: u64,
    pub owner_le: u32,
    pub rank_le: u32,
}
impl WireEntityOwner {
    pub const SIZE: usize = 16;
    pub fn new(id: u64, owner: usize, entity_rank: u8) -> Self {
        Self {
            id_le: id.to_le(),
            owner_le: (owner as u32).to_le(),
            rank_le: (entity_rank as u32).to_le(),
        }
    }
    /// `(global id, owner, entity rank)`.
    pub fn decode(&self) -> (u64, usize, u8) {
        (
            u64::from_le(self.id_le),
            u32::from_le(self.owner_le) as usize,
            u32::from_le(self.rank_le) as u8,
        )
    }
}

const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireRankSummary>(), 24);
const_assert_eq!(size_of::<WireRequestKey>(), WireRequestKey::SIZE);
const_assert_eq!(align_of::<WireRequestKey>(), 8);
const_assert_eq!(size_of::<WireNodeId>(), 8);
const_assert_eq!(size_of::<WireEntityOwner>(), WireEntityOwner::SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keys_survive_the_wire() {
        let keys = vec![WireRequestKey::new(7, 41, 1), WireRequestKey::new(9, 1_000, 2)];
        let bytes = cast_slice(&keys).to_vec();
        let out: Vec<WireRequestKey> = decode_records(&bytes).unwrap();
        assert_eq!(out[0].decode(), (7, 41, 1));
        assert_eq!(out[1].decode(), (9, 1_000, 2));
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let bytes = cast_slice(&[WireNodeId::of(3)]).to_vec();
        assert!(decode_records::<WireNodeId>(&bytes[..5]).is_err());
        assert!(expect_exact_len(5, 8).is_err());
    }

    #[test]
    fn unknown_node_id_decodes_to_none() {
        assert_eq!(WireNodeId::of(12).get(), Some(12));
        assert_eq!(WireNodeId::of(WireNodeId::UNKNOWN).get(), None);
    }

    #[test]
    fn summary_carries_version() {
        let s = WireRankSummary::new(3, 99);
        assert_eq!(s.version(), WIRE_VERSION);
        assert_eq!((s.owned(), s.max_id()), (3, 99));
        assert!(!s.is_failed());
        let f = WireRankSummary::failed(99);
        assert!(f.is_failed());
        assert_eq!((f.owned(), f.max_id()), (0, 99));
    }

    #[test]
    fn entity_owners_survive_the_wire() {
        let records = vec![WireEntityOwner::new(u64::MAX - 1, 3, 2)];
        let out: Vec<WireEntityOwner> = decode_records(cast_slice(&records)).unwrap();
        assert_eq!(out[0].decode(), (u64::MAX - 1, 3, 2));
    }
}
