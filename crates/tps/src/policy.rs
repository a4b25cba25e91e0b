//! Enrollment policy engine
//!
//! Decides, from directory state alone, whether an enrollment request is
//! a fresh enrollment, a renewal, a re-enrollment or a recovery, and
//! which recovery flavor applies. Every refusal carries a distinct
//! rejection reason; unknown configuration values fail closed.

use std::str::FromStr;

use tracing::{debug, info};

use crate::config::PolicyConfig;
use crate::directory::{CertFilter, CertRecord, LostReason, TokenDirectory, TokenStatus};
use crate::{PolicyRejection, Result};

/// Recovery flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryScheme {
    /// Generate a fresh key pair; the lost key stays lost
    GenerateNewKey,
    /// Recover the last archived encryption key
    RecoverLast,
    /// Generate a fresh key for current use and also recover the lost
    /// key into a newly allocated slot; expected certificate count for
    /// the key type goes up by one
    GenerateNewKeyAndRecoverLast,
}

impl FromStr for RecoveryScheme {
    type Err = PolicyRejection;

    fn from_str(s: &str) -> std::result::Result<Self, PolicyRejection> {
        match s {
            "GenerateNewKey" => Ok(Self::GenerateNewKey),
            "RecoverLast" => Ok(Self::RecoverLast),
            "GenerateNewKeyandRecoverLast" => Ok(Self::GenerateNewKeyAndRecoverLast),
            other => Err(PolicyRejection::UnknownRecoveryScheme(other.to_string())),
        }
    }
}

/// Parse a directory lost-reason string, failing closed on anything
/// unrecognized.
pub fn parse_lost_reason(s: &str) -> std::result::Result<LostReason, PolicyRejection> {
    match s {
        "keyCompromise" => Ok(LostReason::KeyCompromise),
        "onHold" => Ok(LostReason::OnHold),
        "destroyed" => Ok(LostReason::Destroyed),
        other => Err(PolicyRejection::UnknownLostReason(other.to_string())),
    }
}

/// The path an enrollment request takes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentPath {
    /// First provisioning of this token
    Fresh,
    /// Per-certificate renewal of an active token
    Renewal {
        /// The certificates currently active on the token
        certs: Vec<CertRecord>,
    },
    /// Full re-enrollment of an active token
    Reenroll,
    /// Provisioning that also recovers credentials from a lost token
    Recovery {
        /// How to treat the lost key material
        scheme: RecoveryScheme,
        /// CUID of the lost token being recovered from
        source_cuid: String,
        /// Token type override (temporary tokens for on-hold recovery)
        token_type_override: Option<String>,
        /// Whether transport trust is re-issued to the new token
        reissue_transport_trust: bool,
    },
}

/// Policy engine over one configuration
#[derive(Debug)]
pub struct PolicyEngine<'a> {
    config: &'a PolicyConfig,
}

impl<'a> PolicyEngine<'a> {
    /// Create an engine for a configuration
    pub const fn new(config: &'a PolicyConfig) -> Self {
        Self { config }
    }

    /// Decide the enrollment path for `cuid` requested by `userid`.
    pub fn decide(
        &self,
        directory: &dyn TokenDirectory,
        userid: &str,
        cuid: &str,
    ) -> Result<EnrollmentPath> {
        let record = directory.find_token(cuid)?;

        let path = match record.as_ref().map(|r| r.status) {
            None => {
                if !self.config.allow_unknown_token {
                    return Err(PolicyRejection::UnknownToken.into());
                }
                self.decide_unprovisioned(directory, userid, cuid)?
            }
            Some(TokenStatus::Uninitialized) => self.decide_unprovisioned(directory, userid, cuid)?,
            Some(TokenStatus::Active) => {
                if self.config.renewal_enabled {
                    let certs = directory.find_certificates(&CertFilter::active_on(cuid))?;
                    EnrollmentPath::Renewal { certs }
                } else if self.config.reenroll_enabled {
                    EnrollmentPath::Reenroll
                } else {
                    return Err(PolicyRejection::Disabled.into());
                }
            }
            Some(TokenStatus::Lost(LostReason::KeyCompromise)) => {
                return Err(PolicyRejection::UnusableKeyCompromise.into());
            }
            Some(TokenStatus::Lost(LostReason::OnHold)) => {
                // Never auto-reactivated: an administrator must move the
                // token back to active by hand, even when the user has
                // no active token left.
                return Err(PolicyRejection::OnHold.into());
            }
            Some(TokenStatus::Lost(LostReason::Destroyed)) => {
                return Err(PolicyRejection::Destroyed.into());
            }
            Some(TokenStatus::Terminated) => {
                return Err(PolicyRejection::Terminated.into());
            }
        };

        debug!(userid, cuid, ?path, "policy decision");
        Ok(path)
    }

    /// Path for a token that has never been provisioned: fresh unless
    /// the user lost a previous token, in which case the lost reason
    /// picks the recovery flavor.
    fn decide_unprovisioned(
        &self,
        directory: &dyn TokenDirectory,
        userid: &str,
        cuid: &str,
    ) -> Result<EnrollmentPath> {
        let others = directory.find_tokens_by_user(userid)?;
        let lost = others
            .iter()
            .filter(|t| t.cuid != cuid)
            .find_map(|t| match t.status {
                TokenStatus::Lost(reason) => Some((t.cuid.clone(), reason)),
                _ => None,
            });

        let Some((source_cuid, reason)) = lost else {
            return Ok(EnrollmentPath::Fresh);
        };

        let scheme = RecoveryScheme::from_str(&self.config.recovery_scheme)?;
        info!(userid, source = %source_cuid, ?reason, "recovering from lost token");

        let path = match reason {
            LostReason::KeyCompromise => EnrollmentPath::Recovery {
                scheme,
                source_cuid,
                token_type_override: None,
                reissue_transport_trust: true,
            },
            LostReason::OnHold => EnrollmentPath::Recovery {
                scheme,
                source_cuid,
                token_type_override: Some(self.config.temporary_token_type.clone()),
                reissue_transport_trust: true,
            },
            LostReason::Destroyed => EnrollmentPath::Recovery {
                scheme,
                source_cuid,
                token_type_override: None,
                reissue_transport_trust: false,
            },
        };
        Ok(path)
    }

    /// Whether a certificate expiring at `not_after` is inside its
    /// renewal grace window at `now`.
    pub fn within_grace_window(&self, not_after: u64, now: u64) -> bool {
        const DAY: u64 = 86_400;
        let open = not_after.saturating_sub(self.config.grace_before_days * DAY);
        let close = not_after.saturating_add(self.config.grace_after_days * DAY);
        (open..=close).contains(&now)
    }
}
