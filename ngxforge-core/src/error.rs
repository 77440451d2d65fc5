//! Error types for ngxforge

use thiserror::Error;

/// Result type for ngxforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ngxforge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration snapshot error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A location or upstream reference points at an entity that does not exist
    #[error("Dangling reference: {0}")]
    Reference(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
