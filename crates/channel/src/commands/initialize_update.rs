//! INITIALIZE UPDATE: first half of the mutual authentication handshake

use tokenkit_apdu::Command;

use crate::{
    Error, Result,
    constants::{INIT_UPDATE_RESPONSE_LENGTH, cla, ins, scp},
    crypto::{CardChallenge, Cryptogram, HostChallenge, SequenceCounter},
};

/// Build an INITIALIZE UPDATE command for the given key set
pub fn build(key_version: u8, key_index: u8, host_challenge: &HostChallenge) -> Command {
    Command::new_with_data(
        cla::GP,
        ins::INITIALIZE_UPDATE,
        key_version,
        key_index,
        host_challenge.to_vec(),
    )
    .with_le(0x00)
}

/// Parsed INITIALIZE UPDATE response payload
#[derive(Debug, Clone)]
pub struct InitUpdateResponse {
    /// Key diversification data
    pub diversification: [u8; 10],
    /// Key version the card is actually using
    pub key_version: u8,
    /// SCP major version
    pub scp_version: u8,
    /// Sequence counter
    pub sequence_counter: SequenceCounter,
    /// Card challenge
    pub card_challenge: CardChallenge,
    /// Card cryptogram
    pub card_cryptogram: Cryptogram,
}

impl InitUpdateResponse {
    /// Parse the fixed-layout response payload.
    ///
    /// This is the only point in the protocol where the card reports
    /// which key version it currently holds, so callers needing a PutKey
    /// decision must capture [`Self::key_version`] here.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != INIT_UPDATE_RESPONSE_LENGTH {
            return Err(Error::InvalidLength {
                expected: INIT_UPDATE_RESPONSE_LENGTH,
                actual: payload.len(),
            });
        }

        let scp_version = payload[11];
        if scp_version != scp::SCP02 {
            return Err(Error::UnsupportedScpVersion(scp_version));
        }

        let mut diversification = [0u8; 10];
        diversification.copy_from_slice(&payload[..10]);

        let mut sequence_counter = [0u8; 2];
        sequence_counter.copy_from_slice(&payload[12..14]);

        let mut card_challenge = [0u8; 6];
        card_challenge.copy_from_slice(&payload[14..20]);

        let mut card_cryptogram = [0u8; 8];
        card_cryptogram.copy_from_slice(&payload[20..28]);

        Ok(Self {
            diversification,
            key_version: payload[10],
            scp_version,
            sequence_counter,
            card_challenge,
            card_cryptogram,
        })
    }
}
