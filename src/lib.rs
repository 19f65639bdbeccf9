#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pe-comm
//!
//! pe-comm keeps domain-decomposed simulation data consistent across the
//! processes of a parallel run. Each process holds some entries it owns and
//! some replicas ("ghosts") of entries owned elsewhere; the library works out
//! who must send what to whom and moves the values.
//!
//! ## Components
//! - [`pattern::CommPattern`]: from an assignment of global ids to owning
//!   ranks, collectively builds the send/receive routing and synchronizes
//!   registered arrays from owners to ghosts.
//! - [`data::descriptor::TypedBufferDescriptor`]: describes a native array
//!   layout (element kind, arity, stride) so any registered array can be
//!   packed and unpacked by the same generic routines.
//! - [`channel::ListeningChannel`]: non-blocking receive of variable-length
//!   frames from one peer, decoded through a descriptor.
//! - [`algs::communicator::Communicator`]: the process-group handle every
//!   constructor takes. Backends: [`NoComm`](algs::communicator::NoComm)
//!   (serial), [`LocalComm`](algs::communicator::LocalComm) (one thread per
//!   rank) and `MpiComm` with the `mpi-support` feature.
//!
//! ## Collectives
//! `build` and `synchronize` must be called by every rank of the group in the
//! same order. An ownership conflict found by any rank is reported as the same
//! [`PeCommError::OwnershipConflict`] on every rank.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! pe-comm = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```

pub mod algs;
pub mod channel;
pub mod comm_error;
pub mod data;
pub mod pattern;
pub mod signal;

pub use comm_error::PeCommError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm, Test, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::channel::{ChannelConfig, ListeningChannel, send_frame};
    pub use crate::comm_error::PeCommError;
    pub use crate::data::descriptor::{Element, ElementKind, TypedBufferDescriptor};
    pub use crate::data::storage::{ArrayStorage, SharedArray, shared};
    pub use crate::pattern::{
        CommPattern, GlobalId, LocalIndex, PatternConfig, Rank, StalePolicy,
    };
    pub use crate::signal::{ArgFrame, ArgValue, PatternSignal};
}
