//! Global id assignment for the node requests of one pass.
//!
//! Every rank takes part, even with no requests:
//!
//! 1. All-gather of `(owned request count, max vertex id)`. Ids start above
//!    the global maximum; rank `r` receives the contiguous range following the
//!    ranges of ranks `0..r`, assigned to its owned requests in registration
//!    order.
//! 2. Requests owned by another rank are sent to their owner as
//!    [`WireRequestKey`]s (count first, then records) and answered with one
//!    [`WireNodeId`] each. A key unknown to its owner is an error on the
//!    requesting rank.
//!
//! Each stage posts its receives, then its sends, waits on every receive
//! without returning early, and drains the sends before reporting.
//!
//! A rank whose pass fails before id assignment still joins the all-gather
//! with a failed summary ([`report_failure`]), so its peers stop at the same
//! point with [`MeshDecompError::PeerFailed`] instead of waiting for it. Later
//! failures are settled by [`agree_on_outcome`] at the end of the pass.

use crate::algs::communicator::{CommTag, Communicator, NodeIdCommTags, Wait};
use crate::algs::wire::{
    WireCount, WireNodeId, WireRankSummary, WireRequestKey, cast_slice, decode_records, expect_exact_len,
};
use crate::data::decomposition_data::DecompositionData;
use crate::mesh_error::MeshDecompError;
use crate::topology::cell_type::EntityRank;
use std::collections::BTreeMap;

/// Assign a global id to every request of the current pass.
///
/// `local_max_id` is the largest vertex id present on this rank.
pub fn assign_node_ids<C: Communicator>(
    data: &mut DecompositionData,
    comm: &C,
    local_max_id: u64,
    tags: NodeIdCommTags,
) -> Result<(), MeshDecompError> {
    let me = comm.rank();
    let owned: Vec<usize> = (0..data.num_requests())
        .filter(|&r| data.requests()[r].owner == me)
        .collect();

    let summaries = all_gather_summary(comm, WireRankSummary::new(owned.len(), local_max_id), tags.summary)?;
    if let Some(peer) = summaries.iter().position(WireRankSummary::is_failed) {
        return Err(MeshDecompError::PeerFailed { peer });
    }
    let global_max = summaries.iter().map(WireRankSummary::max_id).max().unwrap_or(local_max_id);
    let mut next = global_max
        .checked_add(1)
        .ok_or(MeshDecompError::IdOverflow(global_max, 1))?;
    for s in &summaries[..me] {
        next = next
            .checked_add(s.owned())
            .ok_or(MeshDecompError::IdOverflow(next, s.owned()))?;
    }
    for r in owned {
        data.set_node_id(r, next)?;
        next = next.checked_add(1).ok_or(MeshDecompError::IdOverflow(next, 1))?;
    }

    if comm.size() > 1 {
        resolve_remote_ids(data, comm, tags)?;
    } else if let Some(r) = data.requests().iter().find(|r| r.owner != me) {
        return Err(MeshDecompError::UnresolvedRemoteRequest {
            owner: r.owner,
            rank: r.parent.rank,
            secondary_key: r.secondary_key,
        });
    }
    log::debug!(
        "rank {me}: assigned ids to {} requests (ids above {global_max})",
        data.num_requests()
    );
    Ok(())
}

/// Join the id all-gather of a pass this rank could not complete, so that
/// every peer learns about the failure. Communication errors are only logged:
/// the caller is already reporting its own error.
pub fn report_failure<C: Communicator>(comm: &C, local_max_id: u64, tags: NodeIdCommTags) {
    if comm.size() == 1 {
        return;
    }
    if let Err(e) = all_gather_summary(comm, WireRankSummary::failed(local_max_id), tags.summary) {
        log::warn!("rank {}: could not report pass failure: {e}", comm.rank());
    }
}

/// Closing vote of a pass: succeeds only if every rank completed it.
/// `local` is this rank's outcome; the first failed peer is reported otherwise.
pub fn agree_on_outcome<C: Communicator>(
    comm: &C,
    local: bool,
    tags: NodeIdCommTags,
) -> Result<(), MeshDecompError> {
    if comm.size() == 1 {
        return Ok(());
    }
    let mine = if local {
        WireRankSummary::new(0, 0)
    } else {
        WireRankSummary::failed(0)
    };
    let votes = all_gather_summary(comm, mine, tags.outcome)?;
    match votes
        .iter()
        .enumerate()
        .find(|&(peer, v)| peer != comm.rank() && v.is_failed())
    {
        Some((peer, _)) => Err(MeshDecompError::PeerFailed { peer }),
        None => Ok(()),
    }
}

pub(crate) fn comm_error(neighbor: usize, message: impl Into<String>) -> MeshDecompError {
    MeshDecompError::CommError {
        neighbor,
        message: message.into(),
    }
}

/// Exchange one summary with every other rank; result is indexed by rank.
fn all_gather_summary<C: Communicator>(
    comm: &C,
    mine: WireRankSummary,
    tag: CommTag,
) -> Result<Vec<WireRankSummary>, MeshDecompError> {
    let (me, size) = (comm.rank(), comm.size());
    let width = std::mem::size_of::<WireRankSummary>();

    let mut pending = Vec::with_capacity(size.saturating_sub(1));
    for peer in (0..size).filter(|&p| p != me) {
        let mut buf = vec![0u8; width];
        pending.push((peer, comm.irecv(peer, tag.as_u16(), &mut buf)));
    }
    let sends: Vec<_> = (0..size)
        .filter(|&p| p != me)
        .map(|peer| comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(&mine))))
        .collect();

    let mut out = vec![mine; size];
    let mut maybe_err = None;
    for (peer, handle) in pending {
        let decoded = handle
            .wait()
            .ok_or_else(|| comm_error(peer, "no id summary received"))
            .and_then(|data| {
                expect_exact_len(data.len(), width).map_err(|m| comm_error(peer, m))?;
                decode_records::<WireRankSummary>(&data).map_err(|m| comm_error(peer, m))
            });
        match decoded {
            Ok(records) if maybe_err.is_none() => out[peer] = records[0],
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            _ => {}
        }
    }
    for send in sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

fn resolve_remote_ids<C: Communicator>(
    data: &mut DecompositionData,
    comm: &C,
    tags: NodeIdCommTags,
) -> Result<(), MeshDecompError> {
    let (me, size) = (comm.rank(), comm.size());
    let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();

    // requests this rank needs answered, grouped by owner
    let mut wanted: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (r, req) in data.requests().iter().enumerate() {
        if req.owner != me {
            if req.owner >= size {
                return Err(comm_error(req.owner, "request owned by a rank outside the communicator"));
            }
            wanted.entry(req.owner).or_default().push(r);
        }
    }
    let outgoing: BTreeMap<usize, Vec<WireRequestKey>> = peers
        .iter()
        .map(|&p| {
            let keys = wanted
                .get(&p)
                .map(|rs| {
                    rs.iter()
                        .map(|&r| {
                            let req = &data.requests()[r];
                            WireRequestKey::new(req.parent_id, req.secondary_key, req.parent.rank.as_u8())
                        })
                        .collect()
                })
                .unwrap_or_default();
            (p, keys)
        })
        .collect();

    // stage 1: how many keys each peer will send us
    let incoming = exchange_counts(comm, &outgoing, tags)?;

    // stage 2: keys
    let mut key_recvs = Vec::new();
    for (&peer, &n) in &incoming {
        if n > 0 {
            let mut buf = vec![0u8; n * WireRequestKey::SIZE];
            key_recvs.push((peer, n, comm.irecv(peer, tags.requests.as_u16(), &mut buf)));
        }
    }
    let key_sends: Vec<_> = outgoing
        .iter()
        .filter(|(_, keys)| !keys.is_empty())
        .map(|(&peer, keys)| comm.isend(peer, tags.requests.as_u16(), cast_slice(keys)))
        .collect();

    // answer every key we received
    let mut maybe_err = None;
    let mut reply_sends = Vec::new();
    for (peer, n, handle) in key_recvs {
        let keys = handle
            .wait()
            .ok_or_else(|| comm_error(peer, "no request keys received"))
            .and_then(|buf| {
                expect_exact_len(buf.len(), n * WireRequestKey::SIZE).map_err(|m| comm_error(peer, m))?;
                decode_records::<WireRequestKey>(&buf).map_err(|m| comm_error(peer, m))
            });
        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                maybe_err.get_or_insert(e);
                // the peer still waits for a reply of the announced length
                vec![WireRequestKey::new(0, 0, u8::MAX); n]
            }
        };
        let replies: Vec<WireNodeId> = keys
            .iter()
            .map(|k| {
                let (parent_id, secondary, rank) = k.decode();
                let id = EntityRank::from_u8(rank)
                    .and_then(|rank| data.find_by_global_key(rank, parent_id, secondary))
                    .filter(|req| req.owner == me)
                    .and_then(|req| req.node_id);
                WireNodeId::of(id.unwrap_or(WireNodeId::UNKNOWN))
            })
            .collect();
        reply_sends.push(comm.isend(peer, tags.replies.as_u16(), cast_slice(&replies)));
    }

    // stage 3: replies to our keys
    let width = std::mem::size_of::<WireNodeId>();
    let mut reply_recvs = Vec::new();
    for (&peer, keys) in &outgoing {
        if !keys.is_empty() {
            let mut buf = vec![0u8; keys.len() * width];
            reply_recvs.push((peer, comm.irecv(peer, tags.replies.as_u16(), &mut buf)));
        }
    }
    for (peer, handle) in reply_recvs {
        let rs = &wanted[&peer];
        let ids = handle
            .wait()
            .ok_or_else(|| comm_error(peer, "no node id replies received"))
            .and_then(|buf| {
                expect_exact_len(buf.len(), rs.len() * width).map_err(|m| comm_error(peer, m))?;
                decode_records::<WireNodeId>(&buf).map_err(|m| comm_error(peer, m))
            });
        match ids {
            Ok(ids) if maybe_err.is_none() => {
                for (&r, id) in rs.iter().zip(ids) {
                    match id.get() {
                        Some(id) => data.set_node_id(r, id)?,
                        None => {
                            let req = &data.requests()[r];
                            maybe_err = Some(MeshDecompError::UnresolvedRemoteRequest {
                                owner: peer,
                                rank: req.parent.rank,
                                secondary_key: req.secondary_key,
                            });
                            break;
                        }
                    }
                }
            }
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            _ => {}
        }
    }

    for send in key_sends.into_iter().chain(reply_sends) {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Send every peer the number of keys that will follow; return what each peer announced.
fn exchange_counts<C: Communicator>(
    comm: &C,
    outgoing: &BTreeMap<usize, Vec<WireRequestKey>>,
    tags: NodeIdCommTags,
) -> Result<BTreeMap<usize, usize>, MeshDecompError> {
    let width = std::mem::size_of::<WireCount>();
    let mut recvs = Vec::with_capacity(outgoing.len());
    for &peer in outgoing.keys() {
        let mut buf = vec![0u8; width];
        recvs.push((peer, comm.irecv(peer, tags.request_count.as_u16(), &mut buf)));
    }
    let sends: Vec<_> = outgoing
        .iter()
        .map(|(&peer, keys)| {
            let count = WireCount::new(keys.len());
            comm.isend(peer, tags.request_count.as_u16(), cast_slice(std::slice::from_ref(&count)))
        })
        .collect();

    let mut counts = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, handle) in recvs {
        let count = handle
            .wait()
            .ok_or_else(|| comm_error(peer, "no request count received"))
            .and_then(|buf| {
                expect_exact_len(buf.len(), width).map_err(|m| comm_error(peer, m))?;
                decode_records::<WireCount>(&buf).map_err(|m| comm_error(peer, m))
            });
        match count {
            Ok(c) if maybe_err.is_none() => {
                counts.insert(peer, c[0].get());
            }
            Err(e) if maybe_err.is_none() => maybe_err = Some(e),
            _ => {}
        }
    }
    for send in sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(counts),
    }
}
