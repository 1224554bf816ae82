//! Error types for the range cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the range cache.
///
/// Misses and canceled waiters are ordinary outcomes and are reported through
/// `Option`, `bool` or [`EvictionStatus`](crate::cache::EvictionStatus), not here.
#[derive(Error, Debug)]
pub enum Error {
    /// Allocation failed; the operation left the cache unchanged
    #[error("Out of memory allocating {what}")]
    OutOfMemory { what: &'static str },

    /// Range end does not fit in a 64-bit offset
    #[error("Invalid byte range: offset {offset}, length {length}")]
    InvalidRange { offset: u64, length: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Waiter is still registered and cannot be registered again
    #[error("Eviction waiter {id} is already registered")]
    WaiterBusy { id: u64 },

    /// Waiter was allocated by a different cache
    #[error("Eviction waiter {id} belongs to another cache")]
    ForeignWaiter { id: u64 },

    /// Structural check failed
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

// =============================================================================
// Tests
// =============================================================================
