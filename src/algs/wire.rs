//! Fixed, versioned, little-endian wire types for pattern construction.
//!
//! Only control records live here (counts, global ids, ownership claims).
//! Array payloads are laid out by [`TypedBufferDescriptor`](crate::data::descriptor::TypedBufferDescriptor).

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 2;

/// Copy a received byte run into an owned, properly aligned record vector.
///
/// Fails if `raw` is not a whole number of records.
pub fn decode_records<T: Pod>(raw: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if raw.len() % width != 0 {
        return Err(format!(
            "{} bytes is not a multiple of the {width}-byte record",
            raw.len()
        ));
    }
    let mut out = vec![T::zeroed(); raw.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    Ok(out)
}

/// Narrow a count or rank to its 32-bit wire field.
pub fn wire_u32(n: usize, what: &str) -> Result<u32, String> {
    u32::try_from(n).map_err(|_| format!("{what} {n} does not fit a 32-bit wire field"))
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}
impl WireCount {
    pub fn new(n: usize) -> Result<Self, String> {
        Ok(Self {
            n_le: wire_u32(n, "count")?.to_le(),
        })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A global id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGid {
    pub id_le: u64,
}
impl WireGid {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

/// A rank's report to the directory rank: "I hold `gid`, and I do (not) own it".
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireClaim {
    pub gid_le: u64,
    pub owned_le: u32,
    pub _pad: u32,
}
impl WireClaim {
    pub fn new(gid: u64, owned: bool) -> Self {
        Self {
            gid_le: gid.to_le(),
            owned_le: (owned as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn owned(&self) -> bool {
        u32::from_le(self.owned_le) != 0
    }
}

const CONFLICT_PRESENT: u16 = 1;
const SENDER_ABORTED: u16 = 1 << 1;

/// Header of a verdict; followed by `n_ranks` [`WireRank`] records when a
/// conflict is present.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireConflictHdr {
    pub version_le: u16,
    pub flags_le: u16,
    pub n_ranks_le: u32,
    pub gid_le: u64,
}
impl WireConflictHdr {
    pub fn none() -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            flags_le: 0,
            n_ranks_le: 0,
            gid_le: 0,
        }
    }
    pub fn new(gid: u64, n_ranks: usize) -> Result<Self, String> {
        Ok(Self {
            version_le: WIRE_VERSION.to_le(),
            flags_le: CONFLICT_PRESENT.to_le(),
            n_ranks_le: wire_u32(n_ranks, "rank count")?.to_le(),
            gid_le: gid.to_le(),
        })
    }
    /// Mark the sender as unable to complete its part of the build.
    pub fn aborted(mut self) -> Self {
        self.flags_le = (u16::from_le(self.flags_le) | SENDER_ABORTED).to_le();
        self
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn present(&self) -> bool {
        u16::from_le(self.flags_le) & CONFLICT_PRESENT != 0
    }
    pub fn sender_aborted(&self) -> bool {
        u16::from_le(self.flags_le) & SENDER_ABORTED != 0
    }
    pub fn n_ranks(&self) -> usize {
        u32::from_le(self.n_ranks_le) as usize
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// NOTE: ranks are u32 (never usize) on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireRank {
    pub rank_le: u32,
}
impl WireRank {
    pub fn of(rank: usize) -> Result<Self, String> {
        Ok(Self {
            rank_le: wire_u32(rank, "rank")?.to_le(),
        })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.rank_le) as usize
    }
}

// Pod/Zeroable ensures no padding contains uninit when cast to bytes.
const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireGid>(), 8);
const_assert_eq!(size_of::<WireClaim>(), 16);
const_assert_eq!(size_of::<WireConflictHdr>(), 16);
const_assert_eq!(size_of::<WireRank>(), 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_roundtrip() {
        let v = vec![WireClaim::new(7, true), WireClaim::new(u64::MAX, false)];
        let out: Vec<WireClaim> = decode_records(cast_slice(&v)).unwrap();
        assert_eq!(out[0].gid(), 7);
        assert!(out[0].owned());
        assert_eq!(out[1].gid(), u64::MAX);
        assert!(!out[1].owned());
    }

    #[test]
    fn decode_rejects_partial_record() {
        let err = decode_records::<WireGid>(&[0u8; 12]).unwrap_err();
        assert!(err.contains("12 bytes"), "{err}");
    }

    #[test]
    fn version_guard() {
        assert_eq!(WireConflictHdr::none().version(), WIRE_VERSION);
        assert!(!WireConflictHdr::none().present());
        let h = WireConflictHdr::new(9, 2).unwrap();
        assert!(h.present());
        assert!(!h.sender_aborted());
        assert_eq!((h.gid(), h.n_ranks()), (9, 2));
        let a = WireConflictHdr::none().aborted();
        assert!(a.sender_aborted());
        assert!(!a.present());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_fields_are_refused() {
        let big = u32::MAX as usize + 1;
        assert!(WireCount::new(big).unwrap_err().contains("does not fit"));
        assert!(WireRank::of(big).is_err());
        assert!(WireConflictHdr::new(1, big).is_err());
        assert_eq!(WireCount::new(u32::MAX as usize).unwrap().get(), u32::MAX as usize);
    }
}
