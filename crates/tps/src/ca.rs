//! Certificate authority connector interface
//!
//! Issuance, renewal and revocation are delegated to an external CA; key
//! recovery goes through the archive co-located with it. Errors separate
//! per-request rejections (recoverable during renewal loops) from
//! connector failures (always fatal).

use thiserror::Error;

use crate::provider::KeyPurpose;

/// CA connector errors
#[derive(Debug, Error)]
pub enum CaError {
    /// The CA refused this particular request; other requests in the
    /// same session may still succeed
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The connector itself failed; abort the session
    #[error("certificate authority unavailable: {0}")]
    Unavailable(String),
}

/// A certificate enrollment request
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// CA profile to issue under
    pub profile: String,
    /// Subject user id
    pub userid: String,
    /// Token the key pair lives on, dashed CUID
    pub cuid: String,
    /// Encoded public key
    pub public_key: Vec<u8>,
    /// What the key pair is for
    pub purpose: KeyPurpose,
    /// Enrollment challenge bound to the card's key diversification data
    pub challenge: Vec<u8>,
}

/// A certificate as issued by the CA
#[derive(Debug, Clone)]
pub struct IssuedCert {
    /// Serial number
    pub serial: String,
    /// Encoded certificate
    pub der: Vec<u8>,
    /// Validity start, seconds
    pub not_before: u64,
    /// Validity end, seconds
    pub not_after: u64,
}

/// Recovered key material from the archive
#[derive(Debug)]
pub struct RecoveredKey {
    /// The certificate the key belongs to
    pub cert: IssuedCert,
    /// Private key wrapped under the key-encryption key the service
    /// registered with the archive
    pub wrapped_private_key: Vec<u8>,
}

/// Revocation reasons forwarded to the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// Key compromise
    KeyCompromise,
    /// Certificate hold
    CertificateHold,
    /// Superseded by a new certificate
    Superseded,
}

/// The certificate authority the service enrolls against
pub trait CaConnector {
    /// Request a new certificate
    fn enroll(&mut self, request: &EnrollmentRequest) -> Result<IssuedCert, CaError>;

    /// Renew an existing certificate by serial
    fn renew(&mut self, serial: &str, profile: &str) -> Result<IssuedCert, CaError>;

    /// Revoke a certificate
    fn revoke(&mut self, serial: &str, reason: RevocationReason) -> Result<(), CaError>;

    /// Recover an archived key by certificate serial
    fn recover_key(&mut self, serial: &str) -> Result<RecoveredKey, CaError>;
}
