//! Data module: typed buffer descriptors and shared array storage

pub mod descriptor;
pub mod storage;

pub use descriptor::{Element, ElementKind, TypedBufferDescriptor};
pub use storage::{ArrayStorage, SharedArray, shared};
