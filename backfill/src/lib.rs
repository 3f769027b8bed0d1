//! Range-partitioned concurrent backfill engine for Postgres migrations.
//!
//! The crate factors the pattern shared by every large table migration into
//! one reusable runner: split an integer key range into contiguous
//! sub-ranges, hand each sub-range to a worker owning one database
//! connection, process the sub-range in fixed-size chunks with one
//! idempotent upsert per chunk, checkpoint after every committed chunk, and
//! stop cooperatively at chunk boundaries when shutdown is signaled.
//! Interrupted or failed jobs resume from their checkpoint records without
//! reprocessing completed work.

pub mod checkpoint;
pub mod concurrency;
pub mod error;
pub mod job;
mod macros;
pub mod progress;
pub mod range;
pub mod source;
pub mod task;
pub mod tasks;
pub mod workers;
