//! Structured checkpoint records for resumable backfills.
//!
//! Each dispatched sub-range has one checkpoint record updated after every
//! committed chunk. A follow-up invocation loads the records and reprocesses
//! exactly the incomplete portions, never the completed ones.

mod base;
mod memory;
mod postgres;

pub use base::{CheckpointStore, RangeAssignment, RangeState, remaining_ranges};
pub use memory::MemoryCheckpointStore;
pub use postgres::PostgresCheckpointStore;
