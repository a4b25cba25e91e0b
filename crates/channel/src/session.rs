//! Session state for the secure channel
//!
//! A [`Session`] holds the keys derived for one authenticated exchange
//! with a card, together with the challenge material that produced them.
//! Card keys and session keys are zeroized on drop.

use cipher::Key;
use zeroize::Zeroize;

use crate::{
    Error, Result,
    commands::initialize_update::InitUpdateResponse,
    crypto::{
        CardChallenge, Cryptogram, CryptogramKind, DerivationPurpose, HostChallenge, Scp02,
        SequenceCounter, calculate_cryptogram, derive_key, verify_card_cryptogram,
    },
};

/// The (version, index) pair identifying a symmetric key set on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySet {
    /// Key version reported by or requested from the card
    pub version: u8,
    /// Key index within the version
    pub index: u8,
}

impl KeySet {
    /// Create a key set identifier
    pub const fn new(version: u8, index: u8) -> Self {
        Self { version, index }
    }
}

impl std::fmt::Display for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.version, self.index)
    }
}

/// Channel keys: encryption, MAC and data-encryption components
#[derive(Debug, Clone, Zeroize)]
#[zeroize(drop)]
pub struct Keys {
    enc: [u8; 16],
    mac: [u8; 16],
    dek: [u8; 16],
}

impl Keys {
    /// Create a key set from its three components
    pub const fn new(enc: [u8; 16], mac: [u8; 16], dek: [u8; 16]) -> Self {
        Self { enc, mac, dek }
    }

    /// Create a key set where all components are the same key
    pub const fn from_single_key(key: [u8; 16]) -> Self {
        Self {
            enc: key,
            mac: key,
            dek: key,
        }
    }

    /// Encryption key
    pub fn enc(&self) -> &Key<Scp02> {
        Key::<Scp02>::from_slice(&self.enc)
    }

    /// MAC key
    pub fn mac(&self) -> &Key<Scp02> {
        Key::<Scp02>::from_slice(&self.mac)
    }

    /// Data encryption key
    pub fn dek(&self) -> &Key<Scp02> {
        Key::<Scp02>::from_slice(&self.dek)
    }
}

/// One authenticated session's derived keys and challenge material
#[derive(Debug, Clone)]
pub struct Session {
    keys: Keys,
    key_set: KeySet,
    diversification: [u8; 10],
    sequence_counter: SequenceCounter,
    card_challenge: CardChallenge,
    host_challenge: HostChallenge,
}

impl Session {
    /// Derive a session from a parsed INITIALIZE UPDATE response.
    ///
    /// Session keys are derived from the card keys and sequence counter,
    /// then the card's cryptogram is verified before the session is
    /// handed out. A cryptogram mismatch means the card does not hold the
    /// keys we expect and the session must not be used.
    pub fn from_init_response(
        card_keys: &Keys,
        response: &InitUpdateResponse,
        host_challenge: HostChallenge,
        requested_index: u8,
    ) -> Result<Self> {
        let seq = response.sequence_counter;

        let enc = derive_key(card_keys.enc(), &seq, DerivationPurpose::Enc);
        let mac = derive_key(card_keys.mac(), &seq, DerivationPurpose::Mac);
        let dek = derive_key(card_keys.dek(), &seq, DerivationPurpose::Dek);
        let keys = Keys::new(enc.into(), mac.into(), dek.into());

        if !verify_card_cryptogram(
            keys.enc(),
            &seq,
            &response.card_challenge,
            &host_challenge,
            &response.card_cryptogram,
        ) {
            return Err(Error::AuthenticationFailed("card cryptogram mismatch"));
        }

        Ok(Self {
            keys,
            key_set: KeySet::new(response.key_version, requested_index),
            diversification: response.diversification,
            sequence_counter: seq,
            card_challenge: response.card_challenge,
            host_challenge,
        })
    }

    /// Session keys
    pub const fn keys(&self) -> &Keys {
        &self.keys
    }

    /// The key set the card reported during initialization
    pub const fn key_set(&self) -> KeySet {
        self.key_set
    }

    /// The card's key diversification data
    pub const fn diversification_data(&self) -> &[u8; 10] {
        &self.diversification
    }

    /// Sequence counter
    pub const fn sequence_counter(&self) -> &SequenceCounter {
        &self.sequence_counter
    }

    /// Cryptogram proving the host holds the session keys
    pub fn host_cryptogram(&self) -> Cryptogram {
        calculate_cryptogram(
            self.keys.enc(),
            &self.sequence_counter,
            &self.card_challenge,
            &self.host_challenge,
            CryptogramKind::Host,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // Captured from a live card initialized with the default test key.
    const INIT_RESPONSE: [u8; 28] =
        hex!("000002650183039536622002000de9c62ba1c4c8e55fcb91b6654ce4");
    const HOST_CHALLENGE: HostChallenge = hex!("f0467f908e5ca23f");

    fn card_keys() -> Keys {
        Keys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"))
    }

    #[test]
    fn session_from_valid_response() {
        let parsed = InitUpdateResponse::parse(&INIT_RESPONSE).unwrap();
        let session =
            Session::from_init_response(&card_keys(), &parsed, HOST_CHALLENGE, 0).unwrap();

        assert_eq!(session.key_set(), KeySet::new(0x20, 0));
        assert_eq!(session.sequence_counter(), &hex!("000d"));
        assert_eq!(
            session.diversification_data(),
            &hex!("00000265018303953662")
        );
    }

    #[test]
    fn session_rejects_bad_cryptogram() {
        let mut raw = INIT_RESPONSE;
        raw[27] ^= 0xFF;
        let parsed = InitUpdateResponse::parse(&raw).unwrap();

        assert!(matches!(
            Session::from_init_response(&card_keys(), &parsed, HOST_CHALLENGE, 0),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn host_cryptogram_is_deterministic() {
        let parsed = InitUpdateResponse::parse(&INIT_RESPONSE).unwrap();
        let session =
            Session::from_init_response(&card_keys(), &parsed, HOST_CHALLENGE, 0).unwrap();
        assert_eq!(session.host_cryptogram(), session.host_cryptogram());
    }
}
