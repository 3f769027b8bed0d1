use backfill::error::BackfillError;
use backfill_config::LoadConfigError;
use backfill_config::shared::ValidationError;
use backfill_telemetry::tracing::InitTracingError;
use thiserror::Error;

/// Result type for migrator operations.
pub type MigratorResult<T> = Result<T, MigratorError>;

/// Error type for the migrator binary.
#[derive(Debug, Error)]
pub enum MigratorError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] LoadConfigError),
    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    /// Tracing could not be initialized.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] InitTracingError),
    /// I/O error, e.g. while building the runtime.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Error propagated from the backfill engine.
    #[error(transparent)]
    Backfill(#[from] BackfillError),
    /// Any other error from the migration run.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
