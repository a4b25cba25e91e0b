//! Secure-channel protocol and token applet command set
//!
//! This crate implements the authenticated channel a token provisioning
//! service opens to each card: the mutual-authentication handshake with
//! session-key derivation, MAC wrapping of every subsequent command, and
//! typed builders for the card-manager and token-applet instructions the
//! provisioning flows use (key loading, object management, PIN and
//! lifecycle control).

#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod commands;
pub mod constants;
pub mod crypto;

mod card;
mod error;
mod secure_channel;
mod session;

pub use card::{AppletInfo, TokenCard};
pub use commands::get_data::Cplc;
pub use commands::status::AppletStatus;
pub use error::{Error, Result};
pub use secure_channel::{ChannelState, SecureChannel};
pub use session::{KeySet, Keys, Session};

/// Format a 10-byte CUID as the dashed 20-hex-digit form used in logs,
/// audit records and directory entries.
pub fn format_cuid(cuid: &[u8; 10]) -> String {
    let s = hex::encode(cuid);
    format!("{}-{}-{}-{}-{}", &s[..4], &s[4..8], &s[8..12], &s[12..16], &s[16..20])
}
