use thiserror::Error;

/// Result type for token service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Policy rejections: expected, user-facing refusals with a distinct
/// status per reason. These never indicate a fault in the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyRejection {
    /// The requested lifecycle transition is not in the allowed table
    #[error("token transition {from} -> {to} is not allowed")]
    IllegalTransition {
        /// Current status
        from: &'static str,
        /// Requested status
        to: &'static str,
    },

    /// Token is active and neither renewal nor re-enrollment is enabled
    #[error("token is disabled for further enrollment")]
    Disabled,

    /// The token was reported lost with its key compromised
    #[error("token is unusable, key compromise")]
    UnusableKeyCompromise,

    /// The token is on hold and the user still has an active token
    #[error("token is on hold; administrator reactivation required")]
    OnHold,

    /// The token was reported destroyed and cannot be re-enrolled
    #[error("token was reported destroyed")]
    Destroyed,

    /// The token was terminated
    #[error("token is terminated")]
    Terminated,

    /// Unknown tokens are not accepted by policy
    #[error("token is not registered and unknown tokens are not allowed")]
    UnknownToken,

    /// The directory carries a lost reason this service does not know
    #[error("unrecognized lost reason in directory: {0}")]
    UnknownLostReason(String),

    /// The configured recovery scheme string is not recognized
    #[error("unrecognized recovery scheme: {0}")]
    UnknownRecoveryScheme(String),
}

/// Error type for the token service
#[derive(Debug, Error)]
pub enum Error {
    /// Secure channel or card command failure; the token may be left in
    /// an inconsistent state and needs manual inspection
    #[error(transparent)]
    Channel(#[from] tokenkit_channel::Error),

    /// Malformed or missing configuration; never retried
    #[error("configuration error: {0}")]
    Config(String),

    /// Policy refused the request
    #[error(transparent)]
    Policy(#[from] PolicyRejection),

    /// A key with this nickname already exists; never overwritten
    #[error("duplicate keyname: {0}")]
    DuplicateKeyName(String),

    /// Recomputed key check value differs from the one supplied
    #[error("key check value mismatch")]
    KcvMismatch,

    /// Cryptographic provider failure
    #[error("provider error: {0}")]
    Provider(String),

    /// No key with this nickname
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Directory backend failure
    #[error("directory error: {0}")]
    Directory(String),

    /// Certificate authority refused a request outright
    #[error("certificate authority error: {0}")]
    Ca(String),

    /// User authentication failed
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// The on-card object directory is at its capacity
    #[error("object directory full: at most {0} objects per token")]
    ObjectDirectoryFull(usize),

    /// The serialized object directory does not fit the token
    #[error("object data of {size} bytes exceeds free token memory of {free} bytes")]
    ObjectTooLarge {
        /// Serialized size
        size: usize,
        /// Free memory the token reported
        free: usize,
    },

    /// Malformed on-card object data
    #[error("invalid object data: {0}")]
    InvalidObjectData(&'static str),

    /// Compression or file I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed input data (wrapped key files, share entry)
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
