//! Asynchronous listening channel.
//!
//! A [`ListeningChannel`] waits for variable-length frames from one peer on
//! one tag without ever blocking the caller. It is a two-state machine:
//!
//! ```text
//!  Idle --post_receive--> Pending --poll (frame arrived)--> Idle
//!                           |  ^
//!                           +--+ poll (nothing yet)
//! ```
//!
//! The channel owns one receive buffer of `capacity` bytes, reserved on the
//! first post and reused by every later one. While a receive is pending the
//! buffer lives inside the `Pending` state; it goes back to the channel on the
//! way to `Idle` and is freed by `cancel`, `resize` or dropping the channel.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator, Test};
use crate::comm_error::PeCommError;
use crate::data::descriptor::{Element, TypedBufferDescriptor};

/// Default frame capacity in bytes.
pub const DEFAULT_LISTENING_CAPACITY: usize = 65536;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest accepted frame, in bytes.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LISTENING_CAPACITY,
        }
    }
}

enum ChannelState<H> {
    Idle,
    Pending { request: H, buffer: Vec<u8> },
}

/// Non-blocking receive endpoint for frames from one peer.
pub struct ListeningChannel<C: Communicator> {
    comm: C,
    peer: usize,
    tag: CommTag,
    descriptor: TypedBufferDescriptor,
    capacity: usize,
    spare: Vec<u8>,
    state: ChannelState<C::RecvHandle>,
}

impl<C: Communicator> ListeningChannel<C> {
    pub fn new(
        comm: C,
        peer: usize,
        tag: CommTag,
        descriptor: TypedBufferDescriptor,
    ) -> Result<Self, PeCommError> {
        Self::with_capacity(comm, peer, tag, descriptor, DEFAULT_LISTENING_CAPACITY)
    }

    pub fn with_capacity(
        comm: C,
        peer: usize,
        tag: CommTag,
        descriptor: TypedBufferDescriptor,
        capacity: usize,
    ) -> Result<Self, PeCommError> {
        let size = comm.size();
        if peer >= size {
            return Err(PeCommError::InvalidRank { rank: peer, size });
        }
        Ok(Self {
            comm,
            peer,
            tag,
            descriptor,
            capacity,
            spare: Vec::new(),
            state: ChannelState::Idle,
        })
    }

    pub fn from_config(
        comm: C,
        peer: usize,
        tag: CommTag,
        descriptor: TypedBufferDescriptor,
        config: &ChannelConfig,
    ) -> Result<Self, PeCommError> {
        Self::with_capacity(comm, peer, tag, descriptor, config.capacity)
    }

    /// Start listening for the next frame, reusing the channel's buffer.
    pub fn post_receive(&mut self) -> Result<(), PeCommError> {
        if self.is_pending() {
            return Err(PeCommError::AlreadyPending);
        }
        let mut buffer = std::mem::take(&mut self.spare);
        buffer.clear();
        buffer.reserve_exact(self.capacity);
        let request = self.comm.irecv(self.peer, self.tag.as_u16());
        self.state = ChannelState::Pending { request, buffer };
        log::trace!(
            "rank {}: listening to rank {} on tag {:#06x}",
            self.comm.rank(),
            self.peer,
            self.tag.as_u16()
        );
        Ok(())
    }

    /// Check for an arrived frame without blocking.
    ///
    /// Returns `Ok(None)` while nothing has arrived (the channel stays
    /// pending). Once a frame arrives the channel goes back to idle, whether
    /// decoding succeeds or not. The transport delivers whole frames, so an
    /// oversized one is only recognised on arrival and is then dropped.
    pub fn poll<T: Element>(&mut self) -> Result<Option<Vec<T>>, PeCommError> {
        self.descriptor.check_element::<T>()?;
        let frame = match &mut self.state {
            ChannelState::Idle => return Err(PeCommError::NotPending),
            ChannelState::Pending { request, .. } => match request.test() {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };
        let mut buffer = match std::mem::replace(&mut self.state, ChannelState::Idle) {
            ChannelState::Pending { buffer, .. } => buffer,
            ChannelState::Idle => Vec::new(),
        };
        if frame.len() > self.capacity {
            self.spare = buffer;
            log::warn!(
                "rank {}: dropped {}-byte frame from rank {} (capacity {})",
                self.comm.rank(),
                frame.len(),
                self.peer,
                self.capacity
            );
            return Err(PeCommError::BufferOverflow {
                capacity: self.capacity,
                received: frame.len(),
            });
        }
        buffer.extend_from_slice(&frame);
        let decoded = self.descriptor.decode(&buffer);
        self.spare = buffer;
        decoded.map(Some)
    }

    /// Abandon the outstanding receive and free the buffer. Returns whether
    /// one was pending.
    ///
    /// A frame already in flight is not withdrawn from the transport; the next
    /// `post_receive` on the same peer and tag will pick it up.
    pub fn cancel(&mut self) -> bool {
        let was_pending = self.is_pending();
        self.state = ChannelState::Idle;
        self.spare = Vec::new();
        was_pending
    }

    /// Change the capacity for the next `post_receive`.
    pub fn resize(&mut self, capacity: usize) -> Result<(), PeCommError> {
        if self.is_pending() {
            return Err(PeCommError::AlreadyPending);
        }
        if capacity != self.capacity {
            self.spare = Vec::new();
        }
        self.capacity = capacity;
        Ok(())
    }

    /// True when no receive is outstanding and another may be posted.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ChannelState::Idle)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_ready()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently reserved by the receive buffer.
    pub fn reserved(&self) -> usize {
        match &self.state {
            ChannelState::Pending { buffer, .. } => buffer.capacity(),
            ChannelState::Idle => self.spare.capacity(),
        }
    }

    pub fn peer(&self) -> usize {
        self.peer
    }

    pub fn tag(&self) -> CommTag {
        self.tag
    }

    pub fn descriptor(&self) -> TypedBufferDescriptor {
        self.descriptor
    }
}

impl<C: Communicator> std::fmt::Debug for ListeningChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListeningChannel")
            .field("peer", &self.peer)
            .field("tag", &self.tag)
            .field("descriptor", &self.descriptor)
            .field("capacity", &self.capacity)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Encode `values` with `descriptor` and send them to `peer` as one frame.
pub fn send_frame<C: Communicator, T: Element>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    descriptor: &TypedBufferDescriptor,
    values: &[T],
) -> Result<C::SendHandle, PeCommError> {
    let size = comm.size();
    if peer >= size {
        return Err(PeCommError::InvalidRank { rank: peer, size });
    }
    let frame = descriptor.encode(values)?;
    Ok(comm.isend(peer, tag.as_u16(), &frame))
}
