//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Send handles are waitable; receive handles are both waitable (blocking) and
//! testable (non-blocking). The process group is always an explicit handle:
//! nothing in this module keeps process-wide state.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Non-blocking point-to-point interface over a fixed process group.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Test;

    /// Rank of the calling process, `0..size()`.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive for the next message from `peer` carrying `tag`.
    /// The full message is returned on completion; callers validate its length.
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// True for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Non-blocking completion check.
pub trait Test {
    /// Return the message if it has arrived; never blocks.
    fn test(&mut self) -> Option<Vec<u8>>;
}

/// Message tag. Each exchange epoch uses its own tag so concurrent
/// exchanges between the same pair of ranks never match each other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

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

/// The distinct tags used by one communication pattern.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PatternCommTags {
    /// Ownership claims sent to directory ranks.
    pub claims: CommTag,
    /// Per-rank demand counts.
    pub counts: CommTag,
    /// Demanded global-id lists.
    pub ids: CommTag,
    /// Group-wide agreement on the build outcome.
    pub verdict: CommTag,
    /// Array payloads during synchronize.
    pub data: CommTag,
}

impl PatternCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            claims: base,
            counts: base.offset(1),
            ids: base.offset(2),
            verdict: base.offset(3),
            data: base.offset(4),
        }
    }
}

/// Compile-time no-op comm for pure serial use: a group of one.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Test for () {
    fn test(&mut self) -> Option<Vec<u8>> {
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
    fn irecv(&self, _peer: usize, _tag: u16) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: one thread per rank inside a single process ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Intra-process communicator. Every member of a group shares one mailbox;
/// messages between a (src, dst, tag) triple are delivered in FIFO order.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl LocalComm {
    /// Create the `size` members of a fresh, isolated group.
    pub fn group(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }
}

pub struct LocalRecv {
    key: Key,
    mailbox: Arc<Mailbox>,
}

impl LocalRecv {
    fn take(&self) -> Option<Bytes> {
        self.mailbox.get_mut(&self.key)?.pop_front()
    }
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.take() {
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

impl Test for LocalRecv {
    fn test(&mut self) -> Option<Vec<u8>> {
        self.take().map(|b| b.to_vec())
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

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle {
        LocalRecv {
            key: (peer, self.rank, tag),
            mailbox: self.mailbox.clone(),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Test, Wait};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::rc::Rc;

    /// Wraps a communicator created by the caller; MPI is never initialized here.
    #[derive(Clone)]
    pub struct MpiComm {
        world: Rc<SimpleCommunicator>,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world: Rc::new(world),
                rank,
                size,
            }
        }

        pub fn world(&self) -> &SimpleCommunicator {
            &self.world
        }
    }

    /// Owns the send buffer until the request completes.
    pub struct MpiSend {
        request: Option<Request<'static, [u8]>>,
        buf: *mut [u8],
    }

    impl Wait for MpiSend {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.request.take() {
                req.wait();
            }
            None
        }
    }

    impl Drop for MpiSend {
        fn drop(&mut self) {
            if let Some(req) = self.request.take() {
                req.wait();
            }
            // SAFETY: `buf` came from `Box::leak` in `isend` and the only
            // borrow of it (the request) has completed above.
            unsafe { drop(Box::from_raw(self.buf)) };
        }
    }

    /// Lazily matched receive: probes for the message so its size is known
    /// before any buffer is allocated.
    pub struct MpiRecv {
        world: Rc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (msg, _status) = self
                .world
                .process_at_rank(self.peer)
                .matched_probe_with_tag(self.tag);
            let (data, _status) = msg.matched_receive_vec::<u8>();
            Some(data)
        }
    }

    impl Test for MpiRecv {
        fn test(&mut self) -> Option<Vec<u8>> {
            self.world
                .process_at_rank(self.peer)
                .immediate_matched_probe_with_tag(self.tag)
                .map(|(msg, _status)| msg.matched_receive_vec::<u8>().0)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let ptr: *mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation stays alive until `MpiSend` is dropped,
            // which first completes the request.
            let data: &'static [u8] = unsafe { &*ptr };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiSend {
                request: Some(request),
                buf: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            MpiRecv {
                world: self.world.clone(),
                peer: peer as i32,
                tag: tag as i32,
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
