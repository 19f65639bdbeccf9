//! Pluggable storage for registered arrays.
//!
//! The pattern engine never owns array data. Callers keep a
//! [`SharedArray<T>`] and hand the engine a clone of the `Arc`; the engine
//! locks it only while packing or unpacking one synchronize step.

use core::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::data::descriptor::{Element, ElementKind};

/// Caller-owned array shared with the engine.
pub type SharedArray<T> = Arc<RwLock<Vec<T>>>;

/// Wrap `values` as a [`SharedArray`].
pub fn shared<T>(values: Vec<T>) -> SharedArray<T> {
    Arc::new(RwLock::new(values))
}

/// Byte-level, type-erased view of contiguous element storage.
pub trait ArrayStorage: Send + Sync {
    /// Primitive kind of the stored elements.
    fn element_kind(&self) -> ElementKind;

    /// Current length in elements.
    fn element_len(&self) -> usize;

    /// Entire read-only buffer as bytes.
    fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]>;

    /// Entire mutable buffer as bytes.
    fn bytes_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]>;
}

impl<T: Element> ArrayStorage for RwLock<Vec<T>> {
    fn element_kind(&self) -> ElementKind {
        T::KIND
    }

    fn element_len(&self) -> usize {
        self.read().len()
    }

    fn bytes(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.read(), |v| bytemuck::cast_slice(v.as_slice()))
    }

    fn bytes_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.write(), |v| bytemuck::cast_slice_mut(v.as_mut_slice()))
    }
}

impl Debug for dyn ArrayStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayStorage")
            .field("kind", &self.element_kind())
            .field("len", &self.element_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_views_alias_the_elements() {
        let arr = shared(vec![1u32, 2, 3]);
        let storage: Arc<dyn ArrayStorage> = arr.clone();
        assert_eq!(storage.element_kind(), ElementKind::U32);
        assert_eq!(storage.element_len(), 3);
        assert_eq!(storage.bytes().len(), 12);
        storage.bytes_mut()[4..8].copy_from_slice(&7u32.to_ne_bytes());
        assert_eq!(*arr.read(), vec![1, 7, 3]);
    }
}
