//! Error types for arenamap

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type for map operations
pub type Result<T> = std::result::Result<T, MapError>;

/// Errors that can occur while growing or duplicating a map.
///
/// Both variants are recoverable: the map that reported them is left exactly
/// as it was before the call.
#[derive(Error, Debug)]
pub enum MapError {
    /// The arena would grow past its configured ceiling
    #[error("arena capacity exceeded: {requested} bytes requested, limit is {limit}")]
    CapacityExceeded { requested: u64, limit: usize },

    /// The allocator refused to grow the arena
    #[error("arena allocation failed: {0}")]
    Alloc(#[from] TryReserveError),
}

impl MapError {
    /// Create a capacity error
    pub fn capacity(requested: u64, limit: usize) -> Self {
        Self::CapacityExceeded { requested, limit }
    }
}
