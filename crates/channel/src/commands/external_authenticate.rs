//! EXTERNAL AUTHENTICATE: second half of the mutual authentication
//! handshake
//!
//! The command carries the host cryptogram and must itself be MAC-wrapped
//! before transmission; the caller applies the wrapper.

use tokenkit_apdu::Command;

use crate::{constants::ins, crypto::Cryptogram};

/// Security level requested for the session (command MAC on every APDU)
const SECURITY_LEVEL_MAC: u8 = 0x01;

/// Build an EXTERNAL AUTHENTICATE command from the host cryptogram.
///
/// The MAC wrapper sets the secure-messaging class bit when it wraps
/// this command.
pub fn build(host_cryptogram: &Cryptogram) -> Command {
    Command::new_with_data(
        0x80,
        ins::EXTERNAL_AUTHENTICATE,
        SECURITY_LEVEL_MAC,
        0x00,
        host_cryptogram.to_vec(),
    )
}
