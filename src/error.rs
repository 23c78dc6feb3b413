//! Error types for plexfile
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using PlexError
pub type Result<T> = std::result::Result<T, PlexError>;

/// Unified error type for plexfile operations
#[derive(Debug, Error)]
pub enum PlexError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Bounds Errors
    // -------------------------------------------------------------------------
    #[error("position {pos} exceeds maximum {max}")]
    OutOfBounds { pos: u64, max: u64 },

    // -------------------------------------------------------------------------
    // Store Format Errors
    // -------------------------------------------------------------------------
    #[error("invalid store geometry: {0}")]
    Geometry(String),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    // -------------------------------------------------------------------------
    // File Errors
    // -------------------------------------------------------------------------
    #[error("file {0} not found")]
    FileNotFound(u64),

    // -------------------------------------------------------------------------
    // Buffer State Errors
    // -------------------------------------------------------------------------
    #[error("buffer is read-only")]
    ReadOnly,

    #[error("buffer is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Unsupported Operations
    // -------------------------------------------------------------------------
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
