//! Error types and result definitions for backfill operations.
//!
//! Provides a classified error system with aggregation support for
//! multi-worker failure scenarios. [`BackfillError`] represents either a
//! single error with captured caller location, or multiple errors collected
//! while waiting for a pool of workers.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for backfill operations using [`BackfillError`].
pub type BackfillResult<T> = Result<T, BackfillError>;

/// Specific categories of errors that can occur during a backfill.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Failed to connect to the source database or acquire a pooled connection.
    SourceConnectionFailed,
    /// A SQL statement against the source database failed.
    SourceQueryFailed,
    /// The source database reported a lock acquisition timeout.
    SourceLockTimeout,
    /// A statement was canceled on the server side.
    SourceOperationCanceled,
    /// Reading or writing checkpoint records failed.
    CheckpointStoreFailed,
    /// Configuration values were missing or invalid.
    ConfigError,
    /// A key range or dispatch plan was malformed.
    InvalidRange,
    /// A worker task panicked.
    WorkerPanic,
    /// An I/O operation failed.
    IoError,
    /// The error could not be classified.
    Unknown,
}

/// Payload stored for single [`BackfillError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// A single error with captured metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, typically one per failed worker.
    Many {
        errors: Vec<BackfillError>,
        location: &'static Location<'static>,
    },
}

/// Main error type for backfill operations.
#[derive(Debug, Clone)]
pub struct BackfillError {
    repr: ErrorRepr,
}

impl BackfillError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] when the aggregation is empty.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.kind,
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.repr {
            ErrorRepr::Single(payload) => vec![payload.kind],
            ErrorRepr::Many { errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Attaches a source error to a single error.
    ///
    /// Aggregated errors are returned unchanged.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(payload) = &mut self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Returns the source-code location where the error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }
}

impl fmt::Display for BackfillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(f, "{:?}: {}", payload.kind, payload.description)?;
                if let Some(detail) = &payload.detail {
                    write!(f, " ({detail})")?;
                }
                Ok(())
            }
            ErrorRepr::Many { errors, .. } => {
                write!(f, "{} errors occurred:", errors.len())?;
                for err in errors {
                    write!(f, "\n  - {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl error::Error for BackfillError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { .. } => None,
        }
    }
}

impl From<(ErrorKind, &'static str)> for BackfillError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> BackfillError {
        BackfillError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description: Cow::Borrowed(description),
                detail: None,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for BackfillError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> BackfillError {
        BackfillError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description: Cow::Borrowed(description),
                detail: Some(detail.into()),
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl From<Vec<BackfillError>> for BackfillError {
    #[track_caller]
    fn from(errors: Vec<BackfillError>) -> BackfillError {
        BackfillError {
            repr: ErrorRepr::Many {
                errors,
                location: Location::caller(),
            },
        }
    }
}

/// Converts [`std::io::Error`] to [`BackfillError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for BackfillError {
    #[track_caller]
    fn from(err: std::io::Error) -> BackfillError {
        BackfillError::from((ErrorKind::IoError, "I/O operation failed", err.to_string()))
            .with_source(err)
    }
}

/// Converts [`sqlx::Error`] to [`BackfillError`], classifying database errors
/// by SQLSTATE.
impl From<sqlx::Error> for BackfillError {
    #[track_caller]
    fn from(err: sqlx::Error) -> BackfillError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // query_canceled
                Some("57014") => (
                    ErrorKind::SourceOperationCanceled,
                    "Postgres statement was canceled",
                ),
                // lock_not_available
                Some("55P03") => (
                    ErrorKind::SourceLockTimeout,
                    "Postgres lock acquisition timed out",
                ),
                // connection exception class
                Some(code) if code.starts_with("08") => (
                    ErrorKind::SourceConnectionFailed,
                    "Postgres connection failed",
                ),
                _ => (ErrorKind::SourceQueryFailed, "Postgres statement failed"),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorKind::SourceConnectionFailed,
                "Connection pool unavailable",
            ),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => (
                ErrorKind::SourceConnectionFailed,
                "Postgres connection failed",
            ),
            _ => (ErrorKind::SourceQueryFailed, "Postgres operation failed"),
        };

        BackfillError::from((kind, description, err.to_string())).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill_error;

    #[test]
    fn single_error_reports_its_kind() {
        let err = backfill_error!(ErrorKind::InvalidRange, "bad range");
        assert_eq!(err.kind(), ErrorKind::InvalidRange);
        assert_eq!(err.kinds(), vec![ErrorKind::InvalidRange]);
    }

    #[test]
    fn aggregated_errors_report_all_kinds() {
        let errors = vec![
            backfill_error!(ErrorKind::SourceQueryFailed, "statement failed"),
            backfill_error!(ErrorKind::WorkerPanic, "worker panicked"),
        ];
        let err = BackfillError::from(errors);

        assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SourceQueryFailed, ErrorKind::WorkerPanic]
        );
    }

    #[test]
    fn empty_aggregation_is_unknown() {
        let err = BackfillError::from(Vec::new());
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn detail_is_rendered_in_display() {
        let err = backfill_error!(ErrorKind::ConfigError, "missing setting", "job.chunk_size");
        let rendered = err.to_string();
        assert!(rendered.contains("missing setting"));
        assert!(rendered.contains("job.chunk_size"));
    }

    #[test]
    fn io_error_maps_to_io_kind() {
        let err: BackfillError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(std::error::Error::source(&err).is_some());
    }
}
