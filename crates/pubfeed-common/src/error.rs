//! Error types shared across pubfeed crates

use thiserror::Error;

/// Result type alias for pubfeed operations
pub type Result<T> = std::result::Result<T, PubfeedError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum PubfeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}
