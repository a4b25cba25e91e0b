//! Token applet object management: create, write and read object blobs
//!
//! The applet stores each object as a flat byte array addressed by a
//! 4-byte id. Reads and writes move at most [`MAX_CHUNK`] bytes per APDU;
//! callers loop over offsets for larger objects.

use bytes::{BufMut, BytesMut};
use tokenkit_apdu::Command;

use crate::constants::{cla, ins};

/// Object identifier on the card
pub type ObjectId = [u8; 4];

/// Largest object slice one APDU can carry. Leaves room for the 9-byte
/// addressing prefix and the channel MAC inside a one-byte Lc.
pub const MAX_CHUNK: usize = 224;

/// Build a CREATE OBJECT command reserving `size` bytes.
///
/// The trailing six bytes are the object ACL; the token applets this
/// workspace provisions use channel-authenticated access only, which the
/// all-zero ACL encodes.
pub fn build_create(id: &ObjectId, size: u32) -> Command {
    let mut data = BytesMut::with_capacity(14);
    data.put_slice(id);
    data.put_u32(size);
    data.put_slice(&[0u8; 6]);

    Command::new_with_data(cla::APPLET, ins::CREATE_OBJECT, 0x00, 0x00, data.freeze())
}

/// Build a WRITE OBJECT command for one chunk at `offset`.
///
/// Panics in debug builds if the chunk exceeds [`MAX_CHUNK`]; callers
/// are expected to slice first.
pub fn build_write(id: &ObjectId, offset: u32, chunk: &[u8]) -> Command {
    debug_assert!(chunk.len() <= MAX_CHUNK);

    let mut data = BytesMut::with_capacity(9 + chunk.len());
    data.put_slice(id);
    data.put_u32(offset);
    data.put_u8(chunk.len() as u8);
    data.put_slice(chunk);

    Command::new_with_data(cla::APPLET, ins::WRITE_OBJECT, 0x00, 0x00, data.freeze())
}

/// Build a READ OBJECT command for `len` bytes at `offset`
pub fn build_read(id: &ObjectId, offset: u32, len: u8) -> Command {
    let mut data = BytesMut::with_capacity(9);
    data.put_slice(id);
    data.put_u32(offset);
    data.put_u8(len);

    Command::new_with_data(cla::APPLET, ins::READ_OBJECT, 0x00, 0x00, data.freeze()).with_le(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const ID: ObjectId = *b"z0\x00\x00";

    #[test]
    fn create_layout() {
        let cmd = build_create(&ID, 0x0200);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            hex!("B05A00000E 7A300000 00000200 000000000000")
        );
    }

    #[test]
    fn write_layout() {
        let cmd = build_write(&ID, 8, &hex!("cafe"));
        assert_eq!(
            cmd.to_bytes().as_ref(),
            hex!("B0540000 0B 7A300000 00000008 02 cafe")
        );
    }

    #[test]
    fn read_layout() {
        let cmd = build_read(&ID, 0x10, 0x20);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            hex!("B0560000 09 7A300000 00000010 20 20")
        );
    }
}
