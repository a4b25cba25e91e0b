//! Split-knowledge key share combination
//!
//! A transport key is never known to one person: up to three shares,
//! each entered or generated independently, combine into the final key
//! by iterative XOR derivation inside the provider. Share buffers are
//! owned by the ceremony and zeroized on every exit path.

use rand::RngCore;
use zeroize::Zeroizing;

use crate::provider::{CryptoProvider, KeyAlgorithm, KeyHandle};
use crate::{Error, Result};

/// Fixed share length in bytes: one AES-128 key or one double-length
/// DES key
pub const SHARE_LENGTH: usize = 16;

/// One key share. The buffer zeroizes when the share drops, whichever
/// path drops it.
#[derive(Debug)]
pub struct KeyShare(Zeroizing<[u8; SHARE_LENGTH]>);

impl KeyShare {
    /// Generate a share from the system RNG
    pub fn generate() -> Self {
        let mut buf = Zeroizing::new([0u8; SHARE_LENGTH]);
        rand::rng().fill_bytes(buf.as_mut());
        Self(buf)
    }

    /// Parse an operator-entered hex share
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|_| Error::InvalidInput("share is not valid hex"))?;
        let mut buf = Zeroizing::new([0u8; SHARE_LENGTH]);
        if bytes.len() != SHARE_LENGTH {
            return Err(Error::InvalidInput("share must be 16 bytes"));
        }
        buf.copy_from_slice(&bytes);
        Ok(Self(buf))
    }

    /// Share bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Combine ordered shares into one symmetric session key.
///
/// The first share imports directly as the initial key; every further
/// share derives a new key as `current XOR share` under a mechanism
/// bound to the target cipher (the provider widens double-length DES to
/// the triple-length shape legacy modules expect). Intermediate keys are
/// destroyed as soon as they are superseded.
///
/// Combination is deterministic: the same shares in the same order
/// always produce the same key, which is what lets host and card derive
/// matching transport keys from independently entered shares.
pub fn combine(
    provider: &mut dyn CryptoProvider,
    algorithm: KeyAlgorithm,
    shares: &[KeyShare],
) -> Result<KeyHandle> {
    let Some((first, rest)) = shares.split_first() else {
        return Err(Error::InvalidInput("at least one share is required"));
    };

    let mut current = provider.import_key(algorithm, first.as_bytes())?;
    for share in rest {
        match provider.derive_xor_key(current, share.as_bytes()) {
            Ok(next) => {
                provider.destroy(current);
                current = next;
            }
            Err(e) => {
                provider.destroy(current);
                return Err(e);
            }
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SoftProvider;
    use hex_literal::hex;

    fn fixed_shares() -> Vec<KeyShare> {
        [
            "000102030405060708090a0b0c0d0e0f",
            "101112131415161718191a1b1c1d1e1f",
            "202122232425262728292a2b2c2d2e2f",
        ]
        .iter()
        .map(|s| KeyShare::from_hex(s).unwrap())
        .collect()
    }

    #[test]
    fn combination_is_deterministic() {
        let mut p = SoftProvider::new();

        let a = combine(&mut p, KeyAlgorithm::Aes, &fixed_shares()).unwrap();
        let b = combine(&mut p, KeyAlgorithm::Aes, &fixed_shares()).unwrap();

        assert_eq!(p.key_bytes(a).unwrap(), p.key_bytes(b).unwrap());
    }

    #[test]
    fn combination_is_xor_of_shares() {
        let mut p = SoftProvider::new();
        let key = combine(&mut p, KeyAlgorithm::Aes, &fixed_shares()).unwrap();

        // 00.. ^ 10.. ^ 20.. = 30 32 30 32 ...
        assert_eq!(
            p.key_bytes(key).unwrap().as_slice(),
            hex!("303132333435363738393a3b3c3d3e3f")
        );
    }

    #[test]
    fn order_matters_for_nothing_but_bytes_do() {
        let mut p = SoftProvider::new();
        let mut shares = fixed_shares();
        shares.swap(0, 2);

        // XOR commutes, so a reordering still lands on the same key
        let key = combine(&mut p, KeyAlgorithm::Aes, &shares).unwrap();
        assert_eq!(
            p.key_bytes(key).unwrap().as_slice(),
            hex!("303132333435363738393a3b3c3d3e3f")
        );
    }

    #[test]
    fn empty_share_list_refused() {
        let mut p = SoftProvider::new();
        assert!(combine(&mut p, KeyAlgorithm::Aes, &[]).is_err());
    }

    #[test]
    fn share_hex_validation() {
        assert!(KeyShare::from_hex("zz").is_err());
        assert!(KeyShare::from_hex("0011").is_err());
        assert!(KeyShare::from_hex("000102030405060708090a0b0c0d0e0f").is_ok());
    }
}
