//! Thin façade over message passing between the ranks of a partitioned mesh.
//!
//! Messages are contiguous byte slices. Handles are non-blocking until
//! `.wait()` is called; id assignment waits on every handle before it trusts
//! a buffer.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Non-blocking communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive. `buf.len()` is the expected message size; the handle
    /// returns the message as received so the caller can validate its length.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Message tag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags for the phases of one id assignment round and the closing vote.
#[derive(Clone, Copy, Debug)]
pub struct NodeIdCommTags {
    pub summary: CommTag,
    pub request_count: CommTag,
    pub requests: CommTag,
    pub replies: CommTag,
    /// Closing vote on whether every rank completed the pass.
    pub outcome: CommTag,
}

impl NodeIdCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            summary: base,
            request_count: base.offset(1),
            requests: base.offset(2),
            replies: base.offset(3),
            outcome: base.offset(4),
        }
    }
}

/// Single-rank communicator; every exchange is a no-op.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- LocalComm: ranks as threads of one process ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = Arc<DashMap<Key, VecDeque<Bytes>>>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// In-process communicator; each rank of a world runs on its own thread and
/// messages travel through a shared mailbox. Messages between the same pair
/// of ranks with the same tag are delivered in send order.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Mailbox,
    timeout: Duration,
}

impl LocalComm {
    /// One communicator per rank of a world of `size` ranks.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox: Mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// How long a receive waits before reporting nothing.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Pending receive on a [`LocalComm`].
pub struct LocalRecv {
    mailbox: Mailbox,
    key: Key,
    timeout: Duration,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let start = Instant::now();
        loop {
            let popped = self
                .mailbox
                .get_mut(&self.key)
                .and_then(|mut queue| queue.pop_front());
            if let Some(bytes) = popped {
                return Some(bytes.to_vec());
            }
            if start.elapsed() >= self.timeout {
                return None;
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalRecv {
        LocalRecv {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }
}
