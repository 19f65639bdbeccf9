//! Configuration of a communication pattern.

use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, PatternCommTags};

/// Default first tag of a pattern's block. The whole block stays below
/// 32767, the smallest tag bound an MPI implementation may advertise.
pub const DEFAULT_TAG_BASE: u16 = 0x7F00;

/// What `synchronize` does when the ownership assignment changed since the
/// last `build`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Return `PatternStale`.
    #[default]
    Reject,
    /// Run the collective `build` first. Every rank must be stale at the same
    /// call or the group deadlocks.
    AutoRebuild,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub on_stale: StalePolicy,
    /// First tag of the block reserved for this pattern's exchanges.
    /// Patterns that share a communicator need disjoint blocks.
    pub tag_base: u16,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            on_stale: StalePolicy::Reject,
            tag_base: DEFAULT_TAG_BASE,
        }
    }
}

impl PatternConfig {
    pub fn auto_rebuild() -> Self {
        Self {
            on_stale: StalePolicy::AutoRebuild,
            ..Self::default()
        }
    }

    pub fn with_tag_base(mut self, base: u16) -> Self {
        self.tag_base = base;
        self
    }

    pub fn tags(&self) -> PatternCommTags {
        PatternCommTags::from_base(CommTag::new(self.tag_base))
    }
}
