//! Transport and collective exchange building blocks.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm, PatternCommTags, Test, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use exchange::{exchange_all, exchange_counts, exchange_neighbors};
