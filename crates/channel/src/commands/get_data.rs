//! GET DATA for card-manager data objects (CPLC and friends)

use tokenkit_apdu::Command;

use crate::{
    Error, Result,
    constants::{cla, ins, tags},
};

/// Build a GET DATA command for a two-byte tag
pub fn build(tag: u16) -> Command {
    Command::new(cla::GP, ins::GET_DATA, (tag >> 8) as u8, tag as u8).with_le(0x00)
}

/// Card production life cycle data, as returned under tag 9F7F
#[derive(Debug, Clone)]
pub struct Cplc {
    data: Vec<u8>,
}

impl Cplc {
    /// Minimum CPLC length covering the fields the CUID draws from
    const MIN_LENGTH: usize = 23;

    /// Parse a GET DATA response payload, stripping the 9F7F TLV header
    /// when the card includes one.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let data = if payload.len() >= 3 && payload[0] == 0x9F && payload[1] == 0x7F {
            let declared = payload[2] as usize;
            &payload[3..(3 + declared).min(payload.len())]
        } else {
            payload
        };

        if data.len() < Self::MIN_LENGTH {
            return Err(Error::InvalidLength {
                expected: Self::MIN_LENGTH,
                actual: data.len(),
            });
        }

        Ok(Self {
            data: data.to_vec(),
        })
    }

    /// Derive the 10-byte card unique id.
    ///
    /// Layout fixed by the card: fabricator id and type (bytes 3..7),
    /// the tail of the serial number (19..21), then batch and serial
    /// head (15..19).
    pub fn cuid(&self) -> [u8; 10] {
        let mut cuid = [0u8; 10];
        cuid[..4].copy_from_slice(&self.data[3..7]);
        cuid[4..6].copy_from_slice(&self.data[19..21]);
        cuid[6..10].copy_from_slice(&self.data[15..19]);
        cuid
    }

    /// Manufacturer serial number (4 bytes)
    pub fn msn(&self) -> [u8; 4] {
        let mut msn = [0u8; 4];
        msn.copy_from_slice(&self.data[19..23]);
        msn
    }

    /// Raw CPLC bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Build the GET DATA command for the CPLC
pub fn build_cplc() -> Command {
    build(tags::CPLC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const CPLC: [u8; 42] = hex!(
        "4790 5168 3847 91ad 0041 0036 1210 6937"
        "0107 2222 3333 4444 5555 0102 0304 0506"
        "0708 090a 0b0c 0d0e 0f10"
    );

    #[test]
    fn build_command_bytes() {
        assert_eq!(build_cplc().to_bytes().as_ref(), hex!("80CA9F7F00"));
    }

    #[test]
    fn cuid_from_fixed_offsets() {
        let cplc = Cplc::parse(&CPLC).unwrap();
        // bytes 3..7 | 19..21 | 15..19
        assert_eq!(cplc.cuid(), hex!("68384791 2233 37010722"));
        assert_eq!(cplc.msn(), hex!("22333344"));
    }

    #[test]
    fn strips_tlv_header() {
        let mut wrapped = vec![0x9F, 0x7F, 42];
        wrapped.extend_from_slice(&CPLC);
        let cplc = Cplc::parse(&wrapped).unwrap();
        assert_eq!(cplc.as_bytes(), CPLC);
    }

    #[test]
    fn rejects_short_data() {
        assert!(Cplc::parse(&CPLC[..10]).is_err());
    }
}
