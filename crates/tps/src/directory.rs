//! Token and certificate directory interface
//!
//! The authoritative token state lives in an external directory; this
//! module defines the records the service reads and writes, the
//! lifecycle transition table, and the [`TokenDirectory`] trait the
//! production backend implements. [`MemoryDirectory`] is the in-process
//! implementation used by tests and tooling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::audit::ActivityRecord;
use crate::{Error, Result};

/// Why a token was reported lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LostReason {
    /// The key material must be assumed compromised
    KeyCompromise,
    /// Temporarily misplaced; may turn up again
    OnHold,
    /// Physically destroyed
    Destroyed,
}

/// Token lifecycle status as recorded in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenStatus {
    /// Known to the directory but never provisioned
    Uninitialized,
    /// Provisioned and in use
    Active,
    /// Reported lost for the given reason
    Lost(LostReason),
    /// Permanently retired
    Terminated,
}

impl TokenStatus {
    /// Short name used in transition errors and audit records
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Active => "active",
            Self::Lost(_) => "lost",
            Self::Terminated => "terminated",
        }
    }
}

/// The explicit lifecycle transition table. Anything not listed here is
/// forbidden; in particular nothing ever leaves `terminated`.
pub const fn allowed_transition(from: TokenStatus, to: TokenStatus) -> bool {
    use TokenStatus::*;
    matches!(
        (from, to),
        (Uninitialized, Active)
            | (Uninitialized, Terminated)
            | (Active, Active)
            | (Active, Lost(_))
            | (Active, Terminated)
            | (Lost(_), Terminated)
            | (Lost(LostReason::OnHold), Active)
    )
}

/// Certificate status in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertStatus {
    /// Usable
    Active,
    /// Revoked at the CA
    Revoked,
}

/// One token's directory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Dashed CUID string
    pub cuid: String,
    /// Owning user
    pub userid: String,
    /// Lifecycle status
    pub status: TokenStatus,
    /// Applet version last seen on the token
    pub applet_version: String,
    /// Card key version last seen on the token
    pub key_version: u8,
    /// Monotonic modification stamp, seconds
    pub modified_at: u64,
}

/// One certificate's directory record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRecord {
    /// Serial number assigned by the CA
    pub serial: String,
    /// CUID of the token the key pair was created for
    pub origin_cuid: String,
    /// CUID of the token currently carrying the certificate
    pub token_cuid: String,
    /// Key type name from the provisioning plan
    pub key_type: String,
    /// CA profile it was issued under
    pub profile: String,
    /// Status
    pub status: CertStatus,
    /// Credential suffix digit the certificate occupies on the token
    pub suffix: u8,
    /// Validity start, seconds
    pub not_before: u64,
    /// Validity end, seconds
    pub not_after: u64,
    /// Encoded certificate
    pub der: Vec<u8>,
}

/// Filter for certificate lookups
#[derive(Debug, Clone, Default)]
pub struct CertFilter {
    /// Restrict to one carrying token
    pub token_cuid: Option<String>,
    /// Restrict to one key type name
    pub key_type: Option<String>,
    /// Restrict to one status
    pub status: Option<CertStatus>,
}

impl CertFilter {
    /// Filter for the active certificates currently on a token
    pub fn active_on(cuid: &str) -> Self {
        Self {
            token_cuid: Some(cuid.to_string()),
            key_type: None,
            status: Some(CertStatus::Active),
        }
    }

    fn matches(&self, cert: &CertRecord) -> bool {
        self.token_cuid.as_deref().is_none_or(|c| c == cert.token_cuid)
            && self.key_type.as_deref().is_none_or(|k| k == cert.key_type)
            && self.status.is_none_or(|s| s == cert.status)
    }
}

/// The directory backend the service talks to
pub trait TokenDirectory {
    /// Find one token by CUID
    fn find_token(&self, cuid: &str) -> Result<Option<TokenRecord>>;

    /// All tokens belonging to a user, most recently modified first
    fn find_tokens_by_user(&self, userid: &str) -> Result<Vec<TokenRecord>>;

    /// Insert a new token record
    fn add_token(&mut self, record: TokenRecord) -> Result<()>;

    /// Replace an existing token record
    fn update_token(&mut self, record: TokenRecord) -> Result<()>;

    /// Store or replace certificate records for a token
    fn update_certificates(&mut self, certs: &[CertRecord]) -> Result<()>;

    /// Find certificates matching a filter
    fn find_certificates(&self, filter: &CertFilter) -> Result<Vec<CertRecord>>;

    /// Update one certificate's status
    fn update_certificate_status(&mut self, serial: &str, status: CertStatus) -> Result<()>;

    /// Append an activity record to the audit trail
    fn record_activity(&mut self, activity: &ActivityRecord) -> Result<()>;
}

/// In-memory directory used by tests and the operator tool
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    tokens: BTreeMap<String, TokenRecord>,
    certs: BTreeMap<String, CertRecord>,
    activities: Vec<ActivityRecord>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded activity, oldest first
    pub fn activities(&self) -> &[ActivityRecord] {
        &self.activities
    }
}

impl TokenDirectory for MemoryDirectory {
    fn find_token(&self, cuid: &str) -> Result<Option<TokenRecord>> {
        Ok(self.tokens.get(cuid).cloned())
    }

    fn find_tokens_by_user(&self, userid: &str) -> Result<Vec<TokenRecord>> {
        let mut tokens: Vec<TokenRecord> = self
            .tokens
            .values()
            .filter(|t| t.userid == userid)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(tokens)
    }

    fn add_token(&mut self, record: TokenRecord) -> Result<()> {
        if self.tokens.contains_key(&record.cuid) {
            return Err(Error::Directory(format!(
                "token {} already present",
                record.cuid
            )));
        }
        self.tokens.insert(record.cuid.clone(), record);
        Ok(())
    }

    fn update_token(&mut self, record: TokenRecord) -> Result<()> {
        if !self.tokens.contains_key(&record.cuid) {
            return Err(Error::Directory(format!("token {} not found", record.cuid)));
        }
        self.tokens.insert(record.cuid.clone(), record);
        Ok(())
    }

    fn update_certificates(&mut self, certs: &[CertRecord]) -> Result<()> {
        for cert in certs {
            self.certs.insert(cert.serial.clone(), cert.clone());
        }
        Ok(())
    }

    fn find_certificates(&self, filter: &CertFilter) -> Result<Vec<CertRecord>> {
        Ok(self
            .certs
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn update_certificate_status(&mut self, serial: &str, status: CertStatus) -> Result<()> {
        match self.certs.get_mut(serial) {
            Some(cert) => {
                cert.status = status;
                Ok(())
            }
            None => Err(Error::Directory(format!("certificate {serial} not found"))),
        }
    }

    fn record_activity(&mut self, activity: &ActivityRecord) -> Result<()> {
        self.activities.push(activity.clone());
        Ok(())
    }
}
