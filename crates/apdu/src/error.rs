use thiserror::Error;

use crate::StatusWord;

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for APDU construction, parsing and transport
#[derive(Debug, Error)]
pub enum Error {
    /// Transmission to or from the card failed
    #[error("transmission failed: {0}")]
    Transmission(&'static str),

    /// The card is no longer reachable
    #[error("card not connected")]
    NotConnected,

    /// Response shorter than a status word
    #[error("truncated response: {actual} bytes")]
    TruncatedResponse {
        /// Number of bytes actually received
        actual: usize,
    },

    /// Response had an unexpected length for the command sent
    #[error("invalid response length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// The card answered with a non-success status word
    #[error("card returned error status: {0}")]
    Status(StatusWord),

    /// Device-level failure reported by the underlying reader
    #[error("device error: {0}")]
    Device(String),
}
