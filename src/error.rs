//! Error types for blobdepot
//!
//! Provides a unified error type for all operations.
//!
//! Per-item rejections (generation race, barrier violations) are not errors:
//! they travel back to the caller inside the response. Variants here either
//! fail a whole request or, for `Protocol` and `Invariant`, stop the component
//! that observed them.

use thiserror::Error;

/// Result type alias using DepotError
pub type Result<T> = std::result::Result<T, DepotError>;

/// Unified error type for blobdepot operations
#[derive(Debug, Error)]
pub enum DepotError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    /// Malformed frame or a response that does not answer the request it is
    /// correlated with. Fatal for the agent.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal consistency violation in depot state. Fatal for the depot.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not connected to depot")]
    Disconnected,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DepotError {
    /// Whether this error must stop the component that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DepotError::Protocol(_) | DepotError::Invariant(_))
    }
}

impl From<bincode::Error> for DepotError {
    fn from(e: bincode::Error) -> Self {
        DepotError::Serialization(e.to_string())
    }
}
