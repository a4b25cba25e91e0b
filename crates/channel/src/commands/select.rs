//! SELECT applet by AID

use tokenkit_apdu::Command;

use crate::constants::{cla, ins, select_p1};

/// Build a SELECT-by-name command for the given AID
pub fn build(aid: &[u8]) -> Command {
    Command::new_with_data(cla::ISO7816, ins::SELECT, select_p1::BY_NAME, 0x00, aid.to_vec())
        .with_le(0x00)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn build_command_bytes() {
        let cmd = build(&hex!("A0000000030000"));
        assert_eq!(cmd.to_bytes().as_ref(), hex!("00A4040007A000000003000000"));
    }
}
