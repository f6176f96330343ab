//! Error types for ipproxycache

use thiserror::Error;

/// Result type alias for cache construction
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors, raised when the cache is built
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Capacity must hold at least one key
    #[error("Invalid cache capacity: {0} (must be at least 1)")]
    InvalidCapacity(usize),

    /// Staleness window must be non-zero
    #[error("Invalid staleness window: must be greater than zero")]
    InvalidStaleness,

    /// Result field name must be non-empty
    #[error("Invalid target field: must not be empty")]
    InvalidTarget,
}
