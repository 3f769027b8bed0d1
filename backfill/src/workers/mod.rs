//! Range workers and the pool that owns them.

pub mod pool;
pub mod range;
