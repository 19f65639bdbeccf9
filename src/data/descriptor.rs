//! Typed-buffer descriptors: shape and primitive kind of a registered array.
//!
//! A [`TypedBufferDescriptor`] is a small immutable value (`kind`, `arity`,
//! `stride`) that is enough to size a transfer and to pack/unpack entries of a
//! native array viewed as bytes. One generic set of routines serves every
//! primitive kind; adding a kind means adding an [`ElementKind`] variant.
//!
//! Storage layout: entry `i` starts at element `i * stride` and spans `arity`
//! elements. Transfer layout: entries are dense, `arity` elements each, in
//! native byte order.

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::algs::wire::cast_slice_mut;
use crate::comm_error::PeCommError;

/// Primitive element kinds that can be marshalled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ElementKind {
    pub const ALL: [ElementKind; 10] = [
        ElementKind::I8,
        ElementKind::I16,
        ElementKind::I32,
        ElementKind::I64,
        ElementKind::U8,
        ElementKind::U16,
        ElementKind::U32,
        ElementKind::U64,
        ElementKind::F32,
        ElementKind::F64,
    ];

    /// Width of one element in bytes.
    pub const fn width(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 => 8,
        }
    }

    /// Stable numeric code, used when a kind travels inside a control frame.
    pub const fn code(self) -> u16 {
        match self {
            ElementKind::I8 => 1,
            ElementKind::I16 => 2,
            ElementKind::I32 => 3,
            ElementKind::I64 => 4,
            ElementKind::U8 => 5,
            ElementKind::U16 => 6,
            ElementKind::U32 => 7,
            ElementKind::U64 => 8,
            ElementKind::F32 => 9,
            ElementKind::F64 => 10,
        }
    }

    pub fn from_code(code: u16) -> Result<Self, PeCommError> {
        Self::ALL
            .into_iter()
            .find(|k| k.code() == code)
            .ok_or_else(|| PeCommError::UnsupportedType(format!("element code {code}")))
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::I8 => "i8",
            ElementKind::I16 => "i16",
            ElementKind::I32 => "i32",
            ElementKind::I64 => "i64",
            ElementKind::U8 => "u8",
            ElementKind::U16 => "u16",
            ElementKind::U32 => "u32",
            ElementKind::U64 => "u64",
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
        }
    }

    pub const fn is_real(self) -> bool {
        matches!(self, ElementKind::F32 | ElementKind::F64)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementKind {
    type Err = PeCommError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let alias = match lowered.as_str() {
            "int" => "i32",
            "uint" => "u32",
            "real" | "double" => "f64",
            "float" => "f32",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|k| k.name() == alias)
            .ok_or_else(|| PeCommError::UnsupportedType(s.to_string()))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust primitives that map onto an [`ElementKind`].
pub trait Element: Pod + Send + Sync + sealed::Sealed + 'static {
    const KIND: ElementKind;
}

macro_rules! impl_element {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {
                const KIND: ElementKind = ElementKind::$kind;
            }
        )*
    };
}

impl_element! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64,
}

/// Shape and primitive kind of one registered array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DescriptorRepr")]
pub struct TypedBufferDescriptor {
    kind: ElementKind,
    arity: usize,
    stride: usize,
}

/// Unvalidated form read from configuration; `stride` defaults to `arity`.
#[derive(Deserialize)]
struct DescriptorRepr {
    kind: ElementKind,
    arity: usize,
    #[serde(default)]
    stride: Option<usize>,
}

impl TryFrom<DescriptorRepr> for TypedBufferDescriptor {
    type Error = PeCommError;

    fn try_from(r: DescriptorRepr) -> Result<Self, Self::Error> {
        Self::new(r.kind, r.arity, r.stride.unwrap_or(r.arity))
    }
}

impl TypedBufferDescriptor {
    /// `arity` elements per entry, entries `stride` elements apart.
    pub fn new(kind: ElementKind, arity: usize, stride: usize) -> Result<Self, PeCommError> {
        if arity == 0 {
            return Err(PeCommError::UnsupportedType(format!(
                "{kind} entries with zero arity"
            )));
        }
        if stride < arity {
            return Err(PeCommError::UnsupportedType(format!(
                "{kind} entries of arity {arity} with stride {stride}"
            )));
        }
        Ok(Self {
            kind,
            arity,
            stride,
        })
    }

    /// One `T` per entry.
    pub fn scalar<T: Element>() -> Self {
        Self {
            kind: T::KIND,
            arity: 1,
            stride: 1,
        }
    }

    /// Densely packed tuples of `arity` `T`s (e.g. 3 reals per node).
    pub fn tuple<T: Element>(arity: usize) -> Result<Self, PeCommError> {
        Self::new(T::KIND, arity, arity)
    }

    #[inline]
    pub fn kind(&self) -> ElementKind {
        self.kind
    }
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes of one entry in a transfer buffer.
    #[inline]
    pub fn entry_bytes(&self) -> usize {
        self.arity * self.kind.width()
    }

    /// Distance in bytes between consecutive entries in storage.
    #[inline]
    pub fn stride_bytes(&self) -> usize {
        self.stride * self.kind.width()
    }

    /// Transfer size of `count` entries.
    #[inline]
    pub fn transfer_bytes(&self, count: usize) -> usize {
        count * self.entry_bytes()
    }

    /// Elements needed in storage to hold `entries` entries.
    pub fn storage_elements(&self, entries: usize) -> usize {
        entries * self.stride
    }

    /// Number of entries held by storage of `element_len` elements, if it is an
    /// exact multiple of the stride.
    pub fn entries_in(&self, element_len: usize) -> Option<usize> {
        (element_len % self.stride == 0).then(|| element_len / self.stride)
    }

    /// Fails with `UnsupportedType` unless `T` is this descriptor's element type.
    pub fn check_element<T: Element>(&self) -> Result<(), PeCommError> {
        if T::KIND == self.kind {
            Ok(())
        } else {
            Err(PeCommError::UnsupportedType(format!(
                "descriptor holds {} but {} was requested",
                self.kind,
                T::KIND
            )))
        }
    }

    fn entry_range(&self, src_len: usize, index: usize) -> Result<std::ops::Range<usize>, PeCommError> {
        let start = index * self.stride_bytes();
        let end = start + self.entry_bytes();
        if end > src_len {
            return Err(PeCommError::OutOfRange {
                index,
                len: src_len / self.stride_bytes(),
            });
        }
        Ok(start..end)
    }

    /// Append `count` entries starting at `start` to `out`.
    pub fn pack(
        &self,
        src: &[u8],
        start: usize,
        count: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), PeCommError> {
        if count == 0 {
            return Ok(());
        }
        // bounds of the last entry cover all earlier ones
        self.entry_range(src.len(), start + count - 1)?;
        out.reserve(self.transfer_bytes(count));
        if self.stride == self.arity {
            let from = start * self.stride_bytes();
            out.extend_from_slice(&src[from..from + self.transfer_bytes(count)]);
        } else {
            for i in start..start + count {
                out.extend_from_slice(&src[self.entry_range(src.len(), i)?]);
            }
        }
        Ok(())
    }

    /// Append the entries named by `indices`, in that order, to `out`.
    pub fn pack_indices(
        &self,
        src: &[u8],
        indices: &[usize],
        out: &mut Vec<u8>,
    ) -> Result<(), PeCommError> {
        out.reserve(self.transfer_bytes(indices.len()));
        for &i in indices {
            out.extend_from_slice(&src[self.entry_range(src.len(), i)?]);
        }
        Ok(())
    }

    /// Inverse of [`pack`](Self::pack): write dense `data` into consecutive
    /// entries starting at `start`.
    pub fn unpack(&self, dst: &mut [u8], start: usize, data: &[u8]) -> Result<(), PeCommError> {
        self.entries_in_frame(data)?;
        for (k, chunk) in data.chunks_exact(self.entry_bytes()).enumerate() {
            let range = self.entry_range(dst.len(), start + k)?;
            dst[range].copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Inverse of [`pack_indices`](Self::pack_indices).
    pub fn unpack_indices(
        &self,
        dst: &mut [u8],
        indices: &[usize],
        data: &[u8],
    ) -> Result<(), PeCommError> {
        if data.len() != self.transfer_bytes(indices.len()) {
            return Err(PeCommError::MalformedFrame {
                len: data.len(),
                entry_bytes: self.entry_bytes(),
            });
        }
        for (&i, chunk) in indices.iter().zip(data.chunks_exact(self.entry_bytes())) {
            let range = self.entry_range(dst.len(), i)?;
            dst[range].copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Number of whole entries in a transfer frame.
    pub fn entries_in_frame(&self, frame: &[u8]) -> Result<usize, PeCommError> {
        if frame.len() % self.entry_bytes() != 0 {
            return Err(PeCommError::MalformedFrame {
                len: frame.len(),
                entry_bytes: self.entry_bytes(),
            });
        }
        Ok(frame.len() / self.entry_bytes())
    }

    /// Decode a dense transfer frame into `entries * arity` values.
    pub fn decode<T: Element>(&self, frame: &[u8]) -> Result<Vec<T>, PeCommError> {
        self.check_element::<T>()?;
        let entries = self.entries_in_frame(frame)?;
        let mut out = vec![T::zeroed(); entries * self.arity];
        cast_slice_mut(&mut out).copy_from_slice(frame);
        Ok(out)
    }

    /// Encode flat `values` (a whole number of entries) as a dense transfer frame.
    pub fn encode<T: Element>(&self, values: &[T]) -> Result<Vec<u8>, PeCommError> {
        self.check_element::<T>()?;
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.entries_in_frame(bytes)?;
        Ok(bytes.to_vec())
    }
}

impl fmt::Display for TypedBufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.kind, self.arity)?;
        if self.stride != self.arity {
            write!(f, "/{}", self.stride)?;
        }
        Ok(())
    }
}
