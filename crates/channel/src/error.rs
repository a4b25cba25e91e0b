use thiserror::Error;

use crate::secure_channel::ChannelState;

/// Result type for secure channel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for secure channel and card command operations
#[derive(Debug, Error)]
pub enum Error {
    /// APDU construction, parsing or transport errors
    #[error(transparent)]
    Apdu(#[from] tokenkit_apdu::Error),

    /// Operation attempted in the wrong channel state
    #[error("{operation} not permitted in channel state {state}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
        /// The state the channel was in
        state: ChannelState,
    },

    /// Mutual authentication failed; the channel is unusable
    #[error("card authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// The card speaks a secure channel protocol we do not
    #[error("unsupported secure channel protocol version: {0:#04x}")]
    UnsupportedScpVersion(u8),

    /// A field had the wrong length
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// A response payload did not match the expected layout
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),

    /// The channel was already closed
    #[error("secure channel already closed")]
    ChannelClosed,
}
