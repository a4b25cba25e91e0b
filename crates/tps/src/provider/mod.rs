//! Cryptographic provider capability interface
//!
//! The token service never touches primitive cipher math directly: every
//! key operation goes through a [`CryptoProvider`]. Production
//! deployments back this with a hardware module; [`SoftProvider`] is the
//! software implementation used by the operator tool and tests.
//!
//! Handles are opaque. A freshly generated, imported, derived or
//! unwrapped key is a *session* key: it lives until destroyed or stored
//! under a nickname. Nicknames are unique per provider; storing under a
//! taken nickname is refused, never overwritten.

mod soft;

pub use soft::SoftProvider;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Symmetric key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// AES (128, 192 or 256 bits)
    Aes,
    /// Double- or triple-length DES
    Des,
}

impl KeyAlgorithm {
    /// Cipher block length in bytes
    pub const fn block_len(self) -> usize {
        match self {
            Self::Aes => 16,
            Self::Des => 8,
        }
    }

    /// Default key length in bits when the operator gives none
    pub const fn default_bits(self) -> usize {
        match self {
            Self::Aes => 128,
            Self::Des => 128,
        }
    }

    /// Validate a master key length in bytes for this algorithm.
    ///
    /// DES master keys must be exactly double or triple length; anything
    /// else is a misconfiguration, not a value to round.
    pub fn validate_master_len(self, len: usize) -> Result<()> {
        let ok = match self {
            Self::Aes => matches!(len, 16 | 24 | 32),
            Self::Des => matches!(len, 16 | 24),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "invalid {self:?} master key length: {len} bytes"
            )))
        }
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AES" => Ok(Self::Aes),
            "DES" => Ok(Self::Des),
            other => Err(Error::Config(format!("unknown algorithm: {other}"))),
        }
    }
}

/// What an asymmetric key pair will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPurpose {
    /// Signing and authentication credentials
    Signature,
    /// Data encryption credentials
    Encryption,
}

/// Opaque reference to a key inside a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle(pub(crate) u64);

/// Listing entry for a stored key
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// Nickname the key is stored under
    pub nickname: String,
    /// Symmetric algorithm, if the key is symmetric
    pub algorithm: Option<KeyAlgorithm>,
    /// Key length in bits
    pub bits: usize,
    /// Whether the raw material may leave the provider
    pub extractable: bool,
}

/// Capability interface over the cryptographic module
pub trait CryptoProvider {
    /// Generate a fresh symmetric session key
    fn generate_key(&mut self, algorithm: KeyAlgorithm, bits: usize) -> Result<KeyHandle>;

    /// Import raw material as a symmetric session key
    fn import_key(&mut self, algorithm: KeyAlgorithm, material: &[u8]) -> Result<KeyHandle>;

    /// Derive a new session key as `base XOR share`, bound to the base
    /// key's cipher
    fn derive_xor_key(&mut self, base: KeyHandle, share: &[u8]) -> Result<KeyHandle>;

    /// Persist a session key under a nickname.
    ///
    /// Fails with a duplicate-keyname error if the nickname is taken.
    /// Passing `extractable = false` flips the key non-extractable for
    /// the rest of its life.
    fn store_key(&mut self, handle: KeyHandle, nickname: &str, extractable: bool) -> Result<()>;

    /// Look up a stored key by nickname
    fn find_key(&self, nickname: &str) -> Option<KeyHandle>;

    /// Delete a stored key
    fn delete_key(&mut self, nickname: &str) -> Result<()>;

    /// Rename a stored key; the new nickname must be free
    fn rename_key(&mut self, nickname: &str, new_nickname: &str) -> Result<()>;

    /// List stored keys
    fn list_keys(&self) -> Vec<KeyInfo>;

    /// Wrap `target`'s material under `wrapping` (CBC, zero IV)
    fn wrap_key(&mut self, wrapping: KeyHandle, target: KeyHandle) -> Result<Vec<u8>>;

    /// Unwrap previously wrapped material into a session key
    fn unwrap_key(
        &mut self,
        wrapping: KeyHandle,
        algorithm: KeyAlgorithm,
        wrapped: &[u8],
    ) -> Result<KeyHandle>;

    /// Key check value: leading `len` bytes of the zero block encrypted
    /// under the key
    fn key_check_value(&self, handle: KeyHandle, len: usize) -> Result<Vec<u8>>;

    /// SHA-1 based key identifier
    fn key_id(&self, handle: KeyHandle) -> Result<[u8; 20]>;

    /// Raw key material; refused for non-extractable keys
    fn key_bytes(&self, handle: KeyHandle) -> Result<Zeroizing<Vec<u8>>>;

    /// Drop a session key, zeroizing its material
    fn destroy(&mut self, handle: KeyHandle);

    /// Generate an asymmetric key pair; returns the private handle and
    /// the encoded public key
    fn generate_keypair(&mut self, purpose: KeyPurpose) -> Result<(KeyHandle, Vec<u8>)>;

    /// Wrap a private key under a key-encryption key for transport to
    /// the card
    fn wrap_private_key(&mut self, kek: KeyHandle, keypair: KeyHandle) -> Result<Vec<u8>>;

    /// Import a wrapped private key (key recovery); returns the handle
    /// and the encoded public key
    fn import_wrapped_keypair(&mut self, kek: KeyHandle, wrapped: &[u8])
    -> Result<(KeyHandle, Vec<u8>)>;

    /// Provider randomness
    fn random_bytes(&mut self, len: usize) -> Vec<u8>;
}
