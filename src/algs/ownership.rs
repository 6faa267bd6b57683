//! Owners of entities shared across a ghostless partition.
//!
//! A rank that holds only its own cells sees one side of every entity on the
//! partition boundary, so the owner it derives locally may disagree with the
//! neighbour's. [`reconcile_shared_owners`] sends every rank's boundary
//! entities to every peer and lowers each shared owner to the global minimum,
//! which is the owner a replicated mesh would have derived.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::node_ids::comm_error;
use crate::algs::wire::{WireCount, WireEntityOwner, cast_slice, decode_records, expect_exact_len};
use crate::mesh_error::MeshDecompError;
use crate::topology::background::{BackgroundMesh, SimplexBackgroundMesh};
use crate::topology::cell_type::EntityRank;
use hashbrown::HashMap;
use std::collections::BTreeMap;

/// Default base tag; the exchange uses this tag and the next one.
pub const DEFAULT_OWNERSHIP_TAG: u16 = 0xD200;

/// Lower the owner of every entity shared with another rank to the smallest
/// owner any rank derived for it. Returns how many local owners changed.
pub fn reconcile_shared_owners<C: Communicator>(
    mesh: &mut SimplexBackgroundMesh,
    comm: &C,
    tag: CommTag,
) -> Result<usize, MeshDecompError> {
    let (me, size) = (comm.rank(), comm.size());
    if size == 1 {
        return Ok(0);
    }

    let mut local: HashMap<(u8, u64), (usize, EntityRank)> = HashMap::new();
    let mut records = Vec::new();
    for (rank, index) in mesh.boundary_closure() {
        let id = mesh.entity_id(index, rank)?;
        let owner = mesh.entity_owner(index, rank)?;
        local.insert((rank.as_u8(), id), (index, rank));
        records.push(WireEntityOwner::new(id, owner, rank.as_u8()));
    }
    log::debug!("rank {me}: {} boundary entities to reconcile", records.len());
    let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();

    // stage 1: record counts
    let width = std::mem::size_of::<WireCount>();
    let mut count_recvs = Vec::with_capacity(peers.len());
    for &peer in &peers {
        let mut buf = vec![0u8; width];
        count_recvs.push((peer, comm.irecv(peer, tag.as_u16(), &mut buf)));
    }
    let count = WireCount::new(records.len());
    let mut sends: Vec<_> = peers
        .iter()
        .map(|&peer| comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(&count))))
        .collect();

    let mut maybe_err = None;
    let mut incoming = BTreeMap::new();
    for (peer, handle) in count_recvs {
        let n = handle
            .wait()
            .ok_or_else(|| comm_error(peer, "no ownership count received"))
            .and_then(|buf| {
                expect_exact_len(buf.len(), width).map_err(|m| comm_error(peer, m))?;
                decode_records::<WireCount>(&buf).map_err(|m| comm_error(peer, m))
            });
        match n {
            Ok(n) => {
                incoming.insert(peer, n[0].get());
            }
            Err(e) => {
                maybe_err.get_or_insert(e);
            }
        }
    }

    // stage 2: records
    let data_tag = tag.offset(1).as_u16();
    let mut record_recvs = Vec::new();
    for (&peer, &n) in &incoming {
        if n > 0 {
            let mut buf = vec![0u8; n * WireEntityOwner::SIZE];
            record_recvs.push((peer, n, comm.irecv(peer, data_tag, &mut buf)));
        }
    }
    if !records.is_empty() {
        sends.extend(peers.iter().map(|&peer| comm.isend(peer, data_tag, cast_slice(&records))));
    }

    let mut lowered = 0;
    for (peer, n, handle) in record_recvs {
        let theirs = handle
            .wait()
            .ok_or_else(|| comm_error(peer, "no ownership records received"))
            .and_then(|buf| {
                expect_exact_len(buf.len(), n * WireEntityOwner::SIZE).map_err(|m| comm_error(peer, m))?;
                decode_records::<WireEntityOwner>(&buf).map_err(|m| comm_error(peer, m))
            });
        let theirs = match theirs {
            Ok(theirs) => theirs,
            Err(e) => {
                maybe_err.get_or_insert(e);
                continue;
            }
        };
        for record in theirs {
            let (id, owner, rank) = record.decode();
            if let Some(&(index, rank)) = local.get(&(rank, id)) {
                if mesh.lower_owner(index, rank, owner)? {
                    lowered += 1;
                }
            }
        }
    }

    for send in sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => {
            log::debug!("rank {me}: lowered {lowered} shared owners");
            Ok(lowered)
        }
    }
}
