//! Error types for Gibson
//!
//! Provides a unified error type for server-level operations. The protocol
//! and connection layers define their own narrower errors and convert into
//! this one at the boundary.

use thiserror::Error;

/// Result type alias using GibsonError
pub type Result<T> = std::result::Result<T, GibsonError>;

/// Unified error type for Gibson operations
#[derive(Debug, Error)]
pub enum GibsonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
