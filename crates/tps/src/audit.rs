//! Activity records for the audit trail
//!
//! Every enrollment writes exactly one terminal record: success or
//! failure with a human-readable reason. Per-item events (a skipped
//! renewal, a recovered certificate) are recorded as they happen.

use serde::{Deserialize, Serialize};

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityOutcome {
    /// Completed
    Success,
    /// Refused or failed
    Failure,
}

/// One audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Operation name ("enrollment", "renewal", "key-ceremony", ...)
    pub operation: String,
    /// Token involved, dashed CUID
    pub cuid: String,
    /// Requesting user
    pub userid: String,
    /// Outcome
    pub outcome: ActivityOutcome,
    /// Human-readable detail
    pub message: String,
}

impl ActivityRecord {
    /// Build a success record
    pub fn success(operation: &str, cuid: &str, userid: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            cuid: cuid.into(),
            userid: userid.into(),
            outcome: ActivityOutcome::Success,
            message: message.into(),
        }
    }

    /// Build a failure record
    pub fn failure(operation: &str, cuid: &str, userid: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            cuid: cuid.into(),
            userid: userid.into(),
            outcome: ActivityOutcome::Failure,
            message: message.into(),
        }
    }
}
