//! Named-operation surface of the pattern engine.
//!
//! Drivers that address components by name (scripts, a control channel,
//! replayed job files) invoke the engine through [`CommPattern::invoke`] with
//! an [`ArgFrame`] of named options instead of calling methods directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::comm_error::PeCommError;
use crate::pattern::{CommPattern, GlobalId, Rank};

/// Default separator of list-valued string options.
pub const DEFAULT_LIST_SEPARATOR: &str = ";";

/// One option value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Uint(u64),
    UintList(Vec<u64>),
    Str(String),
    Bool(bool),
}

/// Ordered list of named options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgFrame {
    #[serde(default)]
    entries: Vec<(String, ArgValue)>,
    #[serde(default = "default_separator")]
    separator: String,
}

fn default_separator() -> String {
    DEFAULT_LIST_SEPARATOR.to_string()
}

impl Default for ArgFrame {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            separator: default_separator(),
        }
    }
}

impl ArgFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `separator` when reading string options as lists.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Set `name`, replacing a previous value in place.
    pub fn set(&mut self, name: impl Into<String>, value: ArgValue) -> &mut Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Read `name` as a list of unsigned integers.
    ///
    /// A single `Uint` is a one-element list; a string is split on the
    /// frame's separator, ignoring blanks.
    pub fn uint_list(&self, name: &str) -> Result<Vec<u64>, PeCommError> {
        let invalid = |reason: String| PeCommError::InvalidArgument {
            name: name.to_string(),
            reason,
        };
        match self.get(name) {
            None => Err(PeCommError::MissingArgument(name.to_string())),
            Some(ArgValue::UintList(v)) => Ok(v.clone()),
            Some(ArgValue::Uint(v)) => Ok(vec![*v]),
            Some(ArgValue::Str(s)) => s
                .split(self.separator.as_str())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| {
                    item.parse::<u64>()
                        .map_err(|e| invalid(format!("`{item}`: {e}")))
                })
                .collect(),
            Some(ArgValue::Bool(_)) => Err(invalid("expected a list of unsigned integers".into())),
        }
    }
}

/// Operations reachable by name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSignal {
    /// Rebuild the routing, optionally from a new assignment.
    Build,
    /// Propagate owner values to ghosts.
    Synchronize,
}

impl PatternSignal {
    pub const fn name(self) -> &'static str {
        match self {
            PatternSignal::Build => "build",
            PatternSignal::Synchronize => "synchronize",
        }
    }
}

impl fmt::Display for PatternSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PatternSignal {
    type Err = PeCommError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" | "setup" => Ok(PatternSignal::Build),
            "synchronize" | "update" => Ok(PatternSignal::Synchronize),
            other => Err(PeCommError::UnknownSignal(other.to_string())),
        }
    }
}

impl<C: Communicator> CommPattern<C> {
    /// Run the operation called `signal`.
    ///
    /// `build` reads the optional `gids` and `ranks` lists; when either is
    /// present both are required and replace the assignment first. A frame
    /// that cannot be read still joins the collective build, which then fails
    /// with `BuildAborted` on every rank. `synchronize` ignores the frame.
    pub fn invoke(&mut self, signal: &str, frame: &ArgFrame) -> Result<(), PeCommError> {
        let signal: PatternSignal = signal.parse()?;
        log::debug!("rank {}: signal `{signal}`", self.rank());
        match signal {
            PatternSignal::Build if frame.contains("gids") || frame.contains("ranks") => {
                match assignment_args(frame) {
                    Ok((gids, ranks)) => self.build_from(&gids, &ranks),
                    Err(reason) => self.abort_build(reason),
                }
            }
            PatternSignal::Build => self.build(),
            PatternSignal::Synchronize => self.synchronize(),
        }
    }
}

/// The `gids`/`ranks` pair of a `build` frame.
fn assignment_args(frame: &ArgFrame) -> Result<(Vec<GlobalId>, Vec<Rank>), PeCommError> {
    let gids: Vec<GlobalId> = frame.uint_list("gids")?;
    let ranks = frame
        .uint_list("ranks")?
        .into_iter()
        .map(|r| {
            Rank::try_from(r).map_err(|e| PeCommError::InvalidArgument {
                name: "ranks".into(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((gids, ranks))
}
