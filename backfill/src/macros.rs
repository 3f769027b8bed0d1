//! Macros for backfill error handling.
//!
//! Convenience macros for creating and returning [`crate::error::BackfillError`]
//! instances with reduced boilerplate.

/// Creates a [`crate::error::BackfillError`] from error kind and description.
///
/// An optional third argument attaches dynamic detail, and `source:` attaches
/// an underlying error.
#[macro_export]
macro_rules! backfill_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::BackfillError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::BackfillError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::BackfillError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::BackfillError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Creates and returns a [`crate::error::BackfillError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::backfill_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::backfill_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::backfill_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
