//! Cryptographic operations for the secure channel
//!
//! Session-key derivation, cryptogram calculation and command MAC
//! computation for the SCP02-style protocol the card manager speaks, plus
//! the key-block helpers PUT KEY needs (DEK wrapping and key check
//! values).

use aes::{Aes128, Aes192, Aes256};
use cbc_mac::{CbcMac, Mac};
use cipher::{
    BlockEncrypt, BlockEncryptMut, Iv, IvSizeUser, Key, KeyInit, KeyIvInit, KeySizeUser,
    consts::{U8, U16},
    generic_array::GenericArray,
};
use des::{Des, TdesEde3};

use crate::{Error, Result};

/// Sequence counter from INITIALIZE UPDATE
pub type SequenceCounter = [u8; 2];
/// Card challenge (6 bytes, follows the sequence counter on the wire)
pub type CardChallenge = [u8; 6];
/// Host challenge
pub type HostChallenge = [u8; 8];
/// Authentication cryptogram
pub type Cryptogram = [u8; 8];
/// Command MAC
pub type ChannelMac = [u8; 8];

/// Marker type fixing the channel's key and IV sizes
#[allow(missing_debug_implementations)]
pub struct Scp02;

impl KeySizeUser for Scp02 {
    type KeySize = U16;
}

impl IvSizeUser for Scp02 {
    type IvSize = U8;
}

/// What a derived session key will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationPurpose {
    /// Encryption / cryptogram key
    Enc,
    /// Command MAC key
    Mac,
    /// Data encryption key
    Dek,
}

impl DerivationPurpose {
    const fn constant(self) -> [u8; 2] {
        match self {
            Self::Enc => [0x01, 0x82],
            Self::Mac => [0x01, 0x01],
            Self::Dek => [0x01, 0x81],
        }
    }
}

/// Which side a cryptogram authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptogramKind {
    /// Computed by the host, verified by the card
    Host,
    /// Computed by the card, verified by the host
    Card,
}

/// Widen a double-length key to triple length by repeating the first
/// component, as the card's 3DES implementation expects.
pub fn resize_key(key: &Key<Scp02>) -> Key<TdesEde3> {
    let mut out = Key::<TdesEde3>::default();
    out[..16].copy_from_slice(key);
    out[16..24].copy_from_slice(&key[..8]);
    out
}

/// Derive one session key from a card key, the sequence counter and the
/// key's purpose.
pub fn derive_key(
    card_key: &Key<Scp02>,
    seq: &SequenceCounter,
    purpose: DerivationPurpose,
) -> Key<Scp02> {
    let mut blocks = [GenericArray::default(), GenericArray::default()];
    blocks[0][..2].copy_from_slice(&purpose.constant());
    blocks[0][2..4].copy_from_slice(seq);

    let mut enc = cbc::Encryptor::<TdesEde3>::new(&resize_key(card_key), &GenericArray::default());
    enc.encrypt_blocks_mut(&mut blocks);

    let mut out = Key::<Scp02>::default();
    out[..8].copy_from_slice(&blocks[0]);
    out[8..].copy_from_slice(&blocks[1]);
    out
}

/// Calculate an authentication cryptogram.
///
/// The input ordering differs per side: the card cryptogram covers
/// host challenge | sequence | card challenge, the host cryptogram covers
/// sequence | card challenge | host challenge.
pub fn calculate_cryptogram(
    enc_key: &Key<Scp02>,
    seq: &SequenceCounter,
    card_challenge: &CardChallenge,
    host_challenge: &HostChallenge,
    kind: CryptogramKind,
) -> Cryptogram {
    let mut data = Vec::with_capacity(24);
    match kind {
        CryptogramKind::Card => {
            data.extend_from_slice(host_challenge);
            data.extend_from_slice(seq);
            data.extend_from_slice(card_challenge);
        }
        CryptogramKind::Host => {
            data.extend_from_slice(seq);
            data.extend_from_slice(card_challenge);
            data.extend_from_slice(host_challenge);
        }
    }
    pad_iso7816(&mut data);

    des3_cbc_last_block(&resize_key(enc_key), &GenericArray::default(), &data)
}

/// Verify a card cryptogram against a locally calculated one.
pub fn verify_card_cryptogram(
    enc_key: &Key<Scp02>,
    seq: &SequenceCounter,
    card_challenge: &CardChallenge,
    host_challenge: &HostChallenge,
    received: &[u8],
) -> bool {
    let expected = calculate_cryptogram(
        enc_key,
        seq,
        card_challenge,
        host_challenge,
        CryptogramKind::Card,
    );
    expected.as_slice() == received
}

/// Full 3DES retail MAC: single DES over all blocks except the last,
/// 3DES over the last.
pub fn mac_full_3des(key: &Key<Scp02>, icv: &Iv<Scp02>, data: &[u8]) -> ChannelMac {
    let mut padded = data.to_vec();
    pad_iso7816(&mut padded);

    let single = Des::new(GenericArray::from_slice(&key[..8]));
    let triple = TdesEde3::new(&resize_key(key));

    let mut chain = [0u8; 8];
    chain.copy_from_slice(icv);

    let last = padded.len() - 8;
    for block in padded[..last].chunks_exact(8) {
        for (c, b) in chain.iter_mut().zip(block) {
            *c ^= *b;
        }
        single.encrypt_block(GenericArray::from_mut_slice(&mut chain));
    }

    for (c, b) in chain.iter_mut().zip(&padded[last..]) {
        *c ^= *b;
    }
    triple.encrypt_block(GenericArray::from_mut_slice(&mut chain));

    chain
}

/// Encrypt the ICV under single DES before chaining it into the next
/// command's MAC.
pub fn encrypt_icv(mac_key: &Key<Scp02>, icv: &Iv<Scp02>) -> Iv<Scp02> {
    let mut mac = <CbcMac<Des> as Mac>::new(GenericArray::from_slice(&mac_key[..8]));
    mac.update(icv);
    mac.finalize().into_bytes()
}

/// Wrap a 16-byte key under the session DEK (3DES-ECB), as PUT KEY
/// transports key components.
pub fn wrap_key_with_dek(dek: &Key<Scp02>, key: &[u8]) -> Result<Vec<u8>> {
    if key.len() % 8 != 0 {
        return Err(Error::InvalidLength {
            expected: 16,
            actual: key.len(),
        });
    }

    let cipher = TdesEde3::new(&resize_key(dek));
    let mut out = key.to_vec();
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

/// Three-byte key check value of a double-length DES key: leading bytes
/// of the zero block encrypted under the key.
pub fn kcv_des(key: &Key<Scp02>) -> [u8; 3] {
    let cipher = TdesEde3::new(&resize_key(key));
    let mut block = GenericArray::default();
    cipher.encrypt_block(&mut block);
    [block[0], block[1], block[2]]
}

/// Three-byte key check value of an AES key (16, 24 or 32 bytes).
pub fn kcv_aes(key: &[u8]) -> Result<[u8; 3]> {
    let mut block = GenericArray::default();
    match key.len() {
        16 => Aes128::new(GenericArray::from_slice(key)).encrypt_block(&mut block),
        24 => Aes192::new(GenericArray::from_slice(key)).encrypt_block(&mut block),
        32 => Aes256::new(GenericArray::from_slice(key)).encrypt_block(&mut block),
        other => {
            return Err(Error::InvalidLength {
                expected: 16,
                actual: other,
            });
        }
    }
    Ok([block[0], block[1], block[2]])
}

/// ISO 7816-4 padding: 0x80 then zeros to the block boundary.
fn pad_iso7816(data: &mut Vec<u8>) {
    data.push(0x80);
    while data.len() % 8 != 0 {
        data.push(0x00);
    }
}

/// CBC-encrypt and return only the final block.
fn des3_cbc_last_block(key: &Key<TdesEde3>, iv: &GenericArray<u8, U8>, data: &[u8]) -> [u8; 8] {
    debug_assert_eq!(data.len() % 8, 0);

    let cipher = TdesEde3::new(key);
    let mut chain = [0u8; 8];
    chain.copy_from_slice(iv);

    for block in data.chunks_exact(8) {
        for (c, b) in chain.iter_mut().zip(block) {
            *c ^= *b;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut chain));
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn derive_enc_key() {
        let card_key = Key::<Scp02>::clone_from_slice(&hex!("404142434445464748494a4b4c4d4e4f"));
        let derived = derive_key(&card_key, &hex!("0065"), DerivationPurpose::Enc);
        assert_eq!(derived.as_slice(), hex!("85e72aaf47874218a202bf5ef891dd21"));
    }

    #[test]
    fn derive_is_deterministic() {
        let card_key = Key::<Scp02>::clone_from_slice(&hex!("404142434445464748494a4b4c4d4e4f"));
        let a = derive_key(&card_key, &hex!("000d"), DerivationPurpose::Mac);
        let b = derive_key(&card_key, &hex!("000d"), DerivationPurpose::Mac);
        assert_eq!(a, b);
    }

    #[test]
    fn resize_repeats_first_component() {
        let key = Key::<Scp02>::clone_from_slice(&hex!("404142434445464748494a4b4c4d4e4f"));
        assert_eq!(
            resize_key(&key).as_slice(),
            hex!("404142434445464748494a4b4c4d4e4f4041424344454647")
        );
    }

    #[test]
    fn card_cryptogram_matches_reference() {
        let enc_key = Key::<Scp02>::clone_from_slice(&hex!("16b5867ff50be7239c2bf1245b83a362"));
        let got = calculate_cryptogram(
            &enc_key,
            &hex!("0072"),
            &hex!("84f64a7d6465"),
            &hex!("32da078d7aac1cff"),
            CryptogramKind::Card,
        );
        assert_eq!(got, hex!("05c4bb8a86014e22"));

        assert!(verify_card_cryptogram(
            &enc_key,
            &hex!("0072"),
            &hex!("84f64a7d6465"),
            &hex!("32da078d7aac1cff"),
            &hex!("05c4bb8a86014e22"),
        ));
    }

    #[test]
    fn host_and_card_cryptograms_differ() {
        let enc_key = Key::<Scp02>::clone_from_slice(&hex!("16b5867ff50be7239c2bf1245b83a362"));
        let host = calculate_cryptogram(
            &enc_key,
            &hex!("0072"),
            &hex!("84f64a7d6465"),
            &hex!("32da078d7aac1cff"),
            CryptogramKind::Host,
        );
        let card = calculate_cryptogram(
            &enc_key,
            &hex!("0072"),
            &hex!("84f64a7d6465"),
            &hex!("32da078d7aac1cff"),
            CryptogramKind::Card,
        );
        assert_ne!(host, card);
    }

    #[test]
    fn retail_mac_matches_reference() {
        let key = Key::<Scp02>::clone_from_slice(&hex!("5b02e75ad63190aece0622936f11abab"));
        let mac = mac_full_3des(&key, &Default::default(), &hex!("8482010010810b098a8fbb88da"));
        assert_eq!(mac, hex!("5271d7174a5a166a"));
    }

    #[test]
    fn dek_wrap_round_trips_under_decrypt() {
        use cipher::BlockDecrypt;

        let dek = Key::<Scp02>::clone_from_slice(&hex!("404142434445464748494a4b4c4d4e4f"));
        let key = hex!("000102030405060708090a0b0c0d0e0f");
        let wrapped = wrap_key_with_dek(&dek, &key).unwrap();
        assert_eq!(wrapped.len(), 16);
        assert_ne!(wrapped.as_slice(), key);

        let cipher = TdesEde3::new(&resize_key(&dek));
        let mut plain = wrapped.clone();
        for block in plain.chunks_exact_mut(8) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        assert_eq!(plain.as_slice(), key);
    }

    #[test]
    fn wrap_rejects_ragged_length() {
        let dek = Key::<Scp02>::default();
        assert!(wrap_key_with_dek(&dek, &[0u8; 15]).is_err());
    }

    #[test]
    fn kcv_deterministic() {
        let key = Key::<Scp02>::clone_from_slice(&hex!("404142434445464748494a4b4c4d4e4f"));
        assert_eq!(kcv_des(&key), kcv_des(&key));

        let aes_key = hex!("000102030405060708090a0b0c0d0e0f");
        assert_eq!(kcv_aes(&aes_key).unwrap(), kcv_aes(&aes_key).unwrap());
        assert!(kcv_aes(&aes_key[..10]).is_err());
    }
}
