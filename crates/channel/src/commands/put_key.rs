//! PUT KEY: load or replace a symmetric key set on the card
//!
//! Key components travel wrapped under the session DEK, each followed by
//! a three-byte check value the card verifies before committing the set.

use bytes::{BufMut, Bytes, BytesMut};
use cipher::Key;
use tokenkit_apdu::Command;

use crate::{
    Result,
    constants::{cla, ins},
    crypto::{Scp02, kcv_des, wrap_key_with_dek},
    session::Keys,
};

/// Algorithm tag for a DES-ECB wrapped key component
const KEY_TYPE_DES: u8 = 0x80;

/// P2 flag: the data field carries multiple key components
const MULTIPLE_KEYS: u8 = 0x80;

/// Build the PUT KEY data field: new version byte followed by the three
/// wrapped components (ENC, MAC, DEK), each with its check value.
pub fn build_key_block(dek: &Key<Scp02>, new_version: u8, keys: &Keys) -> Result<Bytes> {
    let mut block = BytesMut::with_capacity(1 + 3 * 22);
    block.put_u8(new_version);

    for component in [keys.enc(), keys.mac(), keys.dek()] {
        let wrapped = wrap_key_with_dek(dek, component)?;
        let kcv = kcv_des(component);

        block.put_u8(KEY_TYPE_DES);
        block.put_u8(wrapped.len() as u8);
        block.put_slice(&wrapped);
        block.put_u8(kcv.len() as u8);
        block.put_slice(&kcv);
    }

    Ok(block.freeze())
}

/// Build a PUT KEY command.
///
/// `old_version` is 0 when installing a brand-new key set and the
/// version being replaced otherwise; the first key index is always 1 on
/// the cards this workspace targets.
pub fn build(old_version: u8, key_block: Bytes) -> Command {
    Command::new_with_data(cla::GP, ins::PUT_KEY, old_version, MULTIPLE_KEYS | 0x01, key_block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn key_block_layout() {
        let dek = Key::<Scp02>::clone_from_slice(&hex!("404142434445464748494a4b4c4d4e4f"));
        let keys = Keys::from_single_key(hex!("000102030405060708090a0b0c0d0e0f"));

        let block = build_key_block(&dek, 0x21, &keys).unwrap();
        // version + 3 * (tag + len + 16 wrapped + kcv len + 3 kcv)
        assert_eq!(block.len(), 1 + 3 * 22);
        assert_eq!(block[0], 0x21);
        assert_eq!(block[1], KEY_TYPE_DES);
        assert_eq!(block[2], 0x10);
        // all three components wrap identically for a single-key set
        assert_eq!(block[1..23], block[23..45]);
    }

    #[test]
    fn command_header() {
        let cmd = build(0x20, Bytes::from_static(&[0x21]));
        assert_eq!(cmd.class(), cla::GP);
        assert_eq!(cmd.instruction(), ins::PUT_KEY);
        assert_eq!(cmd.p1(), 0x20);
        assert_eq!(cmd.p2(), 0x81);
    }
}
