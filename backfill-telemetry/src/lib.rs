//! Telemetry initialization for backfill services.

pub mod tracing;
