//! SET ISSUER INFO: issuer banner bytes shown by card tooling

use tokenkit_apdu::Command;

use crate::constants::{cla, ins};

/// Fixed size of the issuer info record on the card
pub const ISSUER_INFO_LENGTH: usize = 224;

/// Build a SET ISSUER INFO command.
///
/// Data shorter than the on-card record is zero-padded to the fixed
/// length; longer data is truncated.
pub fn build(info: &[u8]) -> Command {
    let mut data = vec![0u8; ISSUER_INFO_LENGTH];
    let n = info.len().min(ISSUER_INFO_LENGTH);
    data[..n].copy_from_slice(&info[..n]);

    Command::new_with_data(cla::APPLET, ins::SET_ISSUER_INFO, 0x00, 0x00, data)
}
