//! Error types for the cache.
//!
//! Routine misses are not errors and never show up here; these variants
//! cover construction and probing failures only.

/// Errors that can occur when building or maintaining a cache tier.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Invalid configuration, e.g. an empty or root cache directory
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Capacity probe failed to run or produced unusable output
    #[error("capacity probe failed: {0}")]
    Probe(String),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
