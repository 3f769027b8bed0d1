//! Shared configuration types for backfill jobs.

mod connection;
mod job;
mod migrator;

pub use connection::{
    BACKFILL_ADMIN_OPTIONS, BACKFILL_CHECKPOINT_OPTIONS, BACKFILL_CHUNK_OPTIONS,
    PgConnectionConfig, PgConnectionOptions,
};
pub use job::{BackfillJobConfig, RepartitionConfig};
pub use migrator::MigratorConfig;

use thiserror::Error;

/// Errors surfaced when validating configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: &'static str,
    },
}
