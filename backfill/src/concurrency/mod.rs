//! Concurrency primitives for coordinating backfill workers.
//!
//! The [`shutdown`] module implements the broadcast shutdown pattern used by
//! the job orchestrator: one signal terminates all range workers, and each
//! worker observes it only at a chunk boundary so in-flight statements always
//! complete or error before the worker exits.

pub mod shutdown;
