//! Error types for DriftKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using DriftError
pub type Result<T> = std::result::Result<T, DriftError>;

/// Unified error type for DriftKV operations
#[derive(Debug, Error)]
pub enum DriftError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // AOF Errors
    // -------------------------------------------------------------------------
    #[error("AOF corruption detected: {0}")]
    AofCorruption(String),

    /// The frame reached the log but could not be made durable
    #[error("AOF fsync failed: {0}")]
    AofSync(std::io::Error),

    /// The writer refuses appends after an earlier fsync failure
    #[error("AOF unavailable: {0}")]
    AofUnavailable(String),

    // -------------------------------------------------------------------------
    // RDB Errors
    // -------------------------------------------------------------------------
    #[error("RDB corruption detected: {0}")]
    RdbCorruption(String),

    /// The encoder was driven out of its call sequence.
    #[error("RDB encoder misuse: {0}")]
    EncoderState(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    #[error("WRONGTYPE operation against key '{key}' holding the wrong kind of value")]
    WrongType { key: String },

    #[error("score for member '{member}' of key '{key}' is not a finite number")]
    InvalidScore { key: String, member: String },

    #[error("Database index {index} out of range (configured: {count})")]
    InvalidDatabase { index: usize, count: usize },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for DriftError {
    fn from(err: bincode::Error) -> Self {
        DriftError::Serialization(err.to_string())
    }
}
