//! IMPORT KEY (encrypted): load a wrapped private key into a key slot

use bytes::{BufMut, BytesMut};
use tokenkit_apdu::Command;

use crate::constants::{cla, ins};

/// Build an IMPORT KEY command placing `wrapped` into slot `key_slot`.
///
/// The blob stays opaque here: it was wrapped by the key service under
/// the card's data-encryption key and only the card can open it.
pub fn build(key_slot: u8, wrapped: &[u8]) -> Command {
    let mut data = BytesMut::with_capacity(1 + wrapped.len());
    data.put_u8(key_slot);
    data.put_slice(wrapped);

    Command::new_with_data(cla::APPLET, ins::IMPORT_KEY_ENC, key_slot, 0x00, data.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn import_layout() {
        let cmd = build(0x02, &hex!("deadbeef"));
        assert_eq!(cmd.to_bytes().as_ref(), hex!("B00A0200 05 02 deadbeef"));
    }
}
