//! Configuration loading and shared configuration types for the backfill runner.
//!
//! Configuration is layered: a `base` file, an environment-specific file, and
//! `APP_`-prefixed environment variable overrides, in that order of precedence.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadConfigError, load_config};

/// Trait implemented by configuration structures that require list parsing help.
pub trait Config {
    /// Keys whose values should be parsed as lists when loading the configuration.
    const LIST_PARSE_KEYS: &'static [&'static str];
}
