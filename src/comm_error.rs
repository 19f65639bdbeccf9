//! PeCommError: Unified error type for pe-comm public APIs
//!
//! Every fallible operation of the pattern engine, the descriptor layer and the
//! listening channel returns this type so callers can branch on the variant.

use thiserror::Error;

/// Unified error type for pe-comm operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeCommError {
    /// A global id has zero or more than one owner across the group.
    #[error("ownership conflict: global id {gid} is claimed by ranks {ranks:?} (expected exactly one owner)")]
    OwnershipConflict { gid: u64, ranks: Vec<usize> },
    /// Some ranks could not contribute to a collective build (rejected input
    /// or a failed exchange); every rank of the group reports the same list.
    #[error("collective build aborted: ranks {ranks:?} could not take part")]
    BuildAborted { ranks: Vec<usize> },
    /// Registered array length disagrees with the pattern's local size.
    #[error("array `{name}` holds {found} entries, pattern local size is {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    /// `synchronize` was called on a pattern that has not been rebuilt.
    #[error("communication pattern is stale; call build() first")]
    PatternStale,
    /// Descriptor or element kind not supported for transfer.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    /// Pack/unpack touched storage beyond its bounds.
    #[error("entry index {index} out of range for storage of {len} entries")]
    OutOfRange { index: usize, len: usize },
    /// Inbound frame larger than the listening channel's buffer.
    #[error("frame of {received} bytes overflows listening buffer of {capacity} bytes")]
    BufferOverflow { capacity: usize, received: usize },
    /// A receive is already posted on this channel.
    #[error("listening channel already has a pending receive")]
    AlreadyPending,
    /// `poll` was called without a posted receive.
    #[error("listening channel has no pending receive")]
    NotPending,
    /// Frame length is not a whole number of descriptor entries.
    #[error("frame of {len} bytes is not a multiple of the {entry_bytes}-byte entry size")]
    MalformedFrame { len: usize, entry_bytes: usize },
    /// `ids` and `owners` of an ownership assignment differ in length.
    #[error("ownership assignment has {ids} ids but {owners} owners")]
    LengthMismatch { ids: usize, owners: usize },
    /// A rank outside the process group.
    #[error("rank {rank} is outside the process group of size {size}")]
    InvalidRank { rank: usize, size: usize },
    /// Point-to-point transfer with a neighbor failed or delivered a bad size.
    #[error("communication error with rank {neighbor}: {reason}")]
    Transport { neighbor: usize, reason: String },
    /// Named operation is not known to the pattern engine.
    #[error("unknown signal `{0}`")]
    UnknownSignal(String),
    /// Argument frame lacks a required option.
    #[error("missing argument `{0}`")]
    MissingArgument(String),
    /// Argument frame option has the wrong type or cannot be parsed.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
}

impl PeCommError {
    /// True for errors that every process of the group observes identically.
    pub fn is_collective(&self) -> bool {
        matches!(
            self,
            PeCommError::OwnershipConflict { .. } | PeCommError::BuildAborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_gid_and_ranks() {
        let e = PeCommError::OwnershipConflict {
            gid: 17,
            ranks: vec![1, 3],
        };
        let msg = e.to_string();
        assert!(msg.contains("17"), "{msg}");
        assert!(msg.contains("[1, 3]"), "{msg}");
        assert!(e.is_collective());
        assert!(!PeCommError::PatternStale.is_collective());
        assert!(PeCommError::BuildAborted { ranks: vec![2] }.is_collective());
    }
}
