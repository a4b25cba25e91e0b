//! SET STATUS: card lifecycle transitions

use tokenkit_apdu::Command;

use crate::constants::{cla, ins};

/// Status type: the application itself
const TARGET_APPLICATION: u8 = 0x40;

/// Build a SET STATUS command moving the applet to `state`
pub fn build(state: u8, aid: &[u8]) -> Command {
    Command::new_with_data(cla::GP, ins::SET_STATUS, TARGET_APPLICATION, state, aid.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::lifecycle;
    use hex_literal::hex;

    #[test]
    fn set_provisioned() {
        let cmd = build(lifecycle::PROVISIONED, &hex!("A00000000101"));
        assert_eq!(cmd.to_bytes().as_ref(), hex!("80F0400F06A00000000101"));
    }
}
