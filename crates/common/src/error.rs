//! Common error types for the MRP Rust components.

use std::fmt;

/// A specialized Result type for MRP host operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for MRP host operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("MRP error: {0}")]
    Mrp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new platform (switch / operating system) error.
    pub fn platform(msg: impl fmt::Display) -> Self {
        Error::Platform(msg.to_string())
    }

    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a new protocol engine error.
    pub fn mrp(msg: impl fmt::Display) -> Self {
        Error::Mrp(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }
}
