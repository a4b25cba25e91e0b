//! Applet replacement ceremony commands: DELETE, INSTALL and LOAD
//!
//! Used when the configured applet version differs from what the card
//! reports. The load file travels in numbered blocks; the final block is
//! flagged so the card can link the package.

use bytes::{BufMut, BytesMut};
use tokenkit_apdu::Command;

use crate::constants::{cla, ins, install_p1, load_p1};

/// Largest load-file block per APDU
pub const LOAD_BLOCK_SIZE: usize = 0xD0;

/// Build a DELETE command for a package and everything related to it
pub fn build_delete(aid: &[u8]) -> Command {
    let mut data = BytesMut::with_capacity(2 + aid.len());
    data.put_u8(0x4F);
    data.put_u8(aid.len() as u8);
    data.put_slice(aid);

    Command::new_with_data(cla::GP, ins::DELETE, 0x00, 0x80, data.freeze())
}

/// Build an INSTALL [for load] command announcing the package
pub fn build_install_for_load(package_aid: &[u8]) -> Command {
    let mut data = BytesMut::with_capacity(package_aid.len() + 5);
    data.put_u8(package_aid.len() as u8);
    data.put_slice(package_aid);
    data.put_u8(0x00); // security domain AID length
    data.put_u8(0x00); // load file data block hash length
    data.put_u8(0x00); // load parameters length
    data.put_u8(0x00); // load token length

    Command::new_with_data(cla::GP, ins::INSTALL, install_p1::FOR_LOAD, 0x00, data.freeze())
}

/// Build one LOAD command for block `index` of the load file
pub fn build_load_block(index: u8, block: &[u8], last: bool) -> Command {
    let p1 = if last {
        load_p1::LAST_BLOCK
    } else {
        load_p1::MORE_BLOCKS
    };
    Command::new_with_data(cla::GP, ins::LOAD, p1, index, block.to_vec())
}

/// Build an INSTALL [for install and make selectable] command
pub fn build_install_for_install(package_aid: &[u8], applet_aid: &[u8]) -> Command {
    let mut data = BytesMut::with_capacity(package_aid.len() + 2 * applet_aid.len() + 9);
    data.put_u8(package_aid.len() as u8);
    data.put_slice(package_aid);
    data.put_u8(applet_aid.len() as u8);
    data.put_slice(applet_aid);
    data.put_u8(applet_aid.len() as u8);
    data.put_slice(applet_aid); // instance AID mirrors the applet AID
    data.put_u8(0x01);
    data.put_u8(0x00); // privileges: none
    data.put_u8(0x02);
    data.put_slice(&[0xC9, 0x00]); // empty install parameters
    data.put_u8(0x00); // install token length

    Command::new_with_data(
        cla::GP,
        ins::INSTALL,
        install_p1::FOR_INSTALL_AND_MAKE_SELECTABLE,
        0x00,
        data.freeze(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn delete_wraps_aid_in_tlv() {
        let cmd = build_delete(&hex!("A00000000101"));
        assert_eq!(cmd.to_bytes().as_ref(), hex!("80E40080084F06A00000000101"));
    }

    #[test]
    fn load_block_flags() {
        let more = build_load_block(0, &hex!("0102"), false);
        assert_eq!(more.p1(), load_p1::MORE_BLOCKS);
        let last = build_load_block(3, &hex!("0304"), true);
        assert_eq!(last.p1(), load_p1::LAST_BLOCK);
        assert_eq!(last.p2(), 3);
    }

    #[test]
    fn install_for_load_layout() {
        let cmd = build_install_for_load(&hex!("A000000001"));
        assert_eq!(cmd.to_bytes().as_ref(), hex!("80E60200 0A 05A000000001 00 00 00 00"));
    }
}
