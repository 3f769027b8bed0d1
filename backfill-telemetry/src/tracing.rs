//! Tracing subscriber initialization.
//!
//! Installs a global fmt subscriber filtered by `RUST_LOG`, defaulting to
//! `info` when the variable is absent or invalid.

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Default directive applied when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVE: &str = "info";

/// Errors that can occur while initializing tracing.
#[derive(Debug, Error)]
pub enum InitTracingError {
    /// A global subscriber was already installed.
    #[error("failed to install the tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Initializes the global tracing subscriber for a service.
///
/// The subscriber logs to stderr with targets and thread names included, so
/// per-worker log lines can be attributed. Calling this more than once per
/// process returns an error.
pub fn init_tracing(service_name: &str) -> Result<(), InitTracingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .finish()
        .try_init()?;

    ::tracing::info!(service = service_name, "tracing initialized");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process, so one
    // test exercises both the success and the already-installed paths.
    #[test]
    fn second_initialization_reports_an_error() {
        init_tracing("first").unwrap();

        let err = init_tracing("second").unwrap_err();
        assert!(matches!(err, InitTracingError::Init(_)));
    }
}
