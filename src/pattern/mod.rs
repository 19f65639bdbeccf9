//! Communication-pattern engine.
//!
//! A [`CommPattern`] holds one process's view of an ownership assignment
//! (`ids[i]` is owned by `owners[i]`), the routing derived from it by the
//! collective [`build`](CommPattern::build), and the arrays kept consistent by
//! the collective [`synchronize`](CommPattern::synchronize).
//!
//! Routing:
//! - `updatable[i]` is true iff this rank owns local entry `i`;
//! - `send_map[r]` lists owned local indices, in the order rank `r` asked for them;
//! - `recv_map` lists ghost slots, grouped by owner rank ascending and
//!   ascending local index within a group.
//!
//! Only raw values travel during synchronize, routed by position, so both
//! sides iterate the maps in exactly the order fixed by `build`.

mod build;
pub mod config;
mod sync;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::algs::communicator::{Communicator, PatternCommTags};
use crate::comm_error::PeCommError;
use crate::data::descriptor::TypedBufferDescriptor;
use crate::data::storage::ArrayStorage;

pub use config::{PatternConfig, StalePolicy};

/// Process-independent identifier of one decomposed unit of data.
pub type GlobalId = u64;
/// Process identity within the group, `0..size`.
pub type Rank = usize;
/// Position within one process's local storage.
pub type LocalIndex = usize;

/// A named distributed array bound to a pattern.
#[derive(Clone, Debug)]
pub struct RegisteredArray {
    name: String,
    descriptor: TypedBufferDescriptor,
    storage: Arc<dyn ArrayStorage>,
}

impl RegisteredArray {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> TypedBufferDescriptor {
        self.descriptor
    }

    /// Entries currently held by the storage, if its length is a whole number
    /// of strides.
    pub fn entries(&self) -> Option<usize> {
        self.descriptor.entries_in(self.storage.element_len())
    }

    fn check_len(&self, local_size: usize) -> Result<(), PeCommError> {
        let len = self.storage.element_len();
        if len == self.descriptor.storage_elements(local_size) {
            Ok(())
        } else {
            Err(PeCommError::SizeMismatch {
                name: self.name.clone(),
                expected: local_size,
                found: len / self.descriptor.stride(),
            })
        }
    }
}

/// Routing state and registered arrays of one ownership assignment on one rank.
pub struct CommPattern<C: Communicator> {
    comm: C,
    config: PatternConfig,
    tags: PatternCommTags,
    ids: Vec<GlobalId>,
    owners: Vec<Rank>,
    updatable: Vec<bool>,
    send_map: BTreeMap<Rank, Vec<LocalIndex>>,
    recv_map: Vec<LocalIndex>,
    recv_counts: BTreeMap<Rank, usize>,
    up_to_date: bool,
    arrays: BTreeMap<String, RegisteredArray>,
}

impl<C: Communicator> CommPattern<C> {
    /// Empty, stale pattern over the caller's process group.
    pub fn new(comm: C, config: PatternConfig) -> Self {
        let tags = config.tags();
        Self {
            comm,
            config,
            tags,
            ids: Vec::new(),
            owners: Vec::new(),
            updatable: Vec::new(),
            send_map: BTreeMap::new(),
            recv_map: Vec::new(),
            recv_counts: BTreeMap::new(),
            up_to_date: false,
            arrays: BTreeMap::new(),
        }
    }

    /// Pattern holding an assignment; still stale until [`build`](Self::build).
    pub fn with_assignment(
        comm: C,
        config: PatternConfig,
        ids: &[GlobalId],
        owners: &[Rank],
    ) -> Result<Self, PeCommError> {
        let mut pattern = Self::new(comm, config);
        pattern.set_assignment(ids, owners)?;
        Ok(pattern)
    }

    /// Replace the ownership assignment and mark the pattern stale.
    pub fn set_assignment(&mut self, ids: &[GlobalId], owners: &[Rank]) -> Result<(), PeCommError> {
        if ids.len() != owners.len() {
            return Err(PeCommError::LengthMismatch {
                ids: ids.len(),
                owners: owners.len(),
            });
        }
        let size = self.comm.size();
        if let Some(&rank) = owners.iter().find(|&&r| r >= size) {
            return Err(PeCommError::InvalidRank { rank, size });
        }
        self.ids = ids.to_vec();
        self.owners = owners.to_vec();
        self.up_to_date = false;
        Ok(())
    }

    /// Attach (or replace) the array `name`. Its storage must hold exactly one
    /// entry per local index.
    pub fn add_array(
        &mut self,
        name: impl Into<String>,
        descriptor: TypedBufferDescriptor,
        storage: Arc<dyn ArrayStorage>,
    ) -> Result<(), PeCommError> {
        let name = name.into();
        if storage.element_kind() != descriptor.kind() {
            return Err(PeCommError::UnsupportedType(format!(
                "array `{name}` stores {} but its descriptor is {descriptor}",
                storage.element_kind()
            )));
        }
        let array = RegisteredArray {
            name: name.clone(),
            descriptor,
            storage,
        };
        array.check_len(self.local_size())?;
        log::debug!(
            "rank {}: registered array `{name}` ({descriptor})",
            self.comm.rank()
        );
        self.arrays.insert(name, array);
        Ok(())
    }

    /// Detach the array `name`; returns whether it was registered.
    pub fn remove_array(&mut self, name: &str) -> bool {
        self.arrays.remove(name).is_some()
    }

    pub fn array(&self, name: &str) -> Option<&RegisteredArray> {
        self.arrays.get(name)
    }

    /// Registered array names, in synchronize order.
    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of local entries of the current assignment.
    pub fn local_size(&self) -> usize {
        self.ids.len()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    pub fn global_ids(&self) -> &[GlobalId] {
        &self.ids
    }

    pub fn owners(&self) -> &[Rank] {
        &self.owners
    }

    pub fn updatable(&self) -> &[bool] {
        &self.updatable
    }

    pub fn send_map(&self) -> &BTreeMap<Rank, Vec<LocalIndex>> {
        &self.send_map
    }

    pub fn recv_map(&self) -> &[LocalIndex] {
        &self.recv_map
    }

    /// Ghost entries expected from each owner rank.
    pub fn recv_counts(&self) -> &BTreeMap<Rank, usize> {
        &self.recv_counts
    }

    pub fn ghost_count(&self) -> usize {
        self.recv_map.len()
    }

    fn clear_routing(&mut self) {
        self.updatable.clear();
        self.send_map.clear();
        self.recv_map.clear();
        self.recv_counts.clear();
        self.up_to_date = false;
    }

    /// Check the routing against the assignment.
    fn validate_routing(&self) -> Result<(), PeCommError> {
        let len = self.local_size();
        if self.updatable.len() != len {
            return Err(PeCommError::SizeMismatch {
                name: "updatable".into(),
                expected: len,
                found: self.updatable.len(),
            });
        }
        let expected: usize = self.recv_counts.values().sum();
        if self.recv_map.len() != expected {
            return Err(PeCommError::SizeMismatch {
                name: "recv_map".into(),
                expected,
                found: self.recv_map.len(),
            });
        }
        for &i in &self.recv_map {
            if self.updatable.get(i) != Some(&false) {
                return Err(PeCommError::OutOfRange { index: i, len });
            }
        }
        for &i in self.send_map.values().flatten() {
            if self.updatable.get(i) != Some(&true) {
                return Err(PeCommError::OutOfRange { index: i, len });
            }
        }
        Ok(())
    }

    /// Validate routing bookkeeping and that every registered array still
    /// holds one entry per local index. Returns the first violation.
    pub fn validate_invariants(&self) -> Result<(), PeCommError> {
        if self.up_to_date {
            self.validate_routing()?;
        }
        for array in self.arrays.values() {
            array.check_len(self.local_size())?;
        }
        Ok(())
    }
}

impl<C: Communicator> std::fmt::Debug for CommPattern<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommPattern")
            .field("rank", &self.comm.rank())
            .field("local_size", &self.local_size())
            .field("ghosts", &self.recv_map.len())
            .field("send_ranks", &self.send_map.keys().collect::<Vec<_>>())
            .field("up_to_date", &self.up_to_date)
            .field("arrays", &self.arrays.keys().collect::<Vec<_>>())
            .finish()
    }
}
