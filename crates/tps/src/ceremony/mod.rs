//! Operator key ceremonies
//!
//! The flows behind the operator tool: transport key generation from
//! split-knowledge shares, master key generation, wrapping a master key
//! for transport between modules, and the verified unwrap on the
//! receiving side. Every flow checks the target nickname is free before
//! touching key material, and an unwrap whose recomputed check value
//! disagrees with the one carried beside the ciphertext aborts with
//! nothing written.

pub mod combiner;

pub use combiner::{KeyShare, SHARE_LENGTH, combine};

use tracing::{info, warn};

use crate::provider::{CryptoProvider, KeyAlgorithm, KeyHandle, KeyInfo};
use crate::{Error, Result};

/// Shares per transport key ceremony
pub const SHARE_COUNT: usize = 3;

/// Default key check value length in bytes
pub const DEFAULT_KCV_LENGTH: usize = 4;

/// Outcome of a ceremony that produced or verified a key
#[derive(Debug, Clone)]
pub struct CeremonyReport {
    /// Nickname the key is stored under
    pub nickname: String,
    /// Key check value for operator verification
    pub kcv: Vec<u8>,
}

/// A wrapped master key together with its integrity check value, as
/// written to and read from transport files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKeyFile {
    /// Algorithm of the wrapped key
    pub algorithm: KeyAlgorithm,
    /// Check value of the plaintext key
    pub kcv: Vec<u8>,
    /// Ciphertext under the transport key
    pub wrapped: Vec<u8>,
}

const FILE_MAGIC: &[u8; 4] = b"TKW1";

impl WrappedKeyFile {
    /// Serialize to the transport file format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.kcv.len() + self.wrapped.len());
        out.extend_from_slice(FILE_MAGIC);
        out.push(match self.algorithm {
            KeyAlgorithm::Aes => 0,
            KeyAlgorithm::Des => 1,
        });
        out.push(self.kcv.len() as u8);
        out.extend_from_slice(&self.kcv);
        out.push((self.wrapped.len() >> 8) as u8);
        out.push(self.wrapped.len() as u8);
        out.extend_from_slice(&self.wrapped);
        out
    }

    /// Parse the transport file format
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 || &data[..4] != FILE_MAGIC {
            return Err(Error::InvalidInput("not a wrapped key file"));
        }
        let algorithm = match data[4] {
            0 => KeyAlgorithm::Aes,
            1 => KeyAlgorithm::Des,
            _ => return Err(Error::InvalidInput("unknown algorithm in key file")),
        };
        let kcv_len = data[5] as usize;
        if data.len() < 6 + kcv_len + 2 {
            return Err(Error::InvalidInput("truncated key file"));
        }
        let kcv = data[6..6 + kcv_len].to_vec();
        let len_off = 6 + kcv_len;
        let wrapped_len = ((data[len_off] as usize) << 8) | data[len_off + 1] as usize;
        let wrapped_off = len_off + 2;
        if data.len() < wrapped_off + wrapped_len {
            return Err(Error::InvalidInput("truncated key file"));
        }
        Ok(Self {
            algorithm,
            kcv,
            wrapped: data[wrapped_off..wrapped_off + wrapped_len].to_vec(),
        })
    }
}

/// Key ceremony driver over one provider
pub struct KeyCeremony<'a> {
    provider: &'a mut dyn CryptoProvider,
    kcv_length: usize,
}

impl std::fmt::Debug for KeyCeremony<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCeremony")
            .field("kcv_length", &self.kcv_length)
            .finish()
    }
}

impl<'a> KeyCeremony<'a> {
    /// Create a ceremony driver
    pub fn new(provider: &'a mut dyn CryptoProvider) -> Self {
        Self {
            provider,
            kcv_length: DEFAULT_KCV_LENGTH,
        }
    }

    /// Override the check value length
    pub fn with_kcv_length(mut self, len: usize) -> Self {
        self.kcv_length = len;
        self
    }

    fn require_free_nickname(&self, nickname: &str) -> Result<()> {
        if self.provider.find_key(nickname).is_some() {
            return Err(Error::DuplicateKeyName(nickname.to_string()));
        }
        Ok(())
    }

    /// Generate a transport key from freshly drawn shares.
    ///
    /// The duplicate-nickname check runs before any share exists, so a
    /// refused ceremony leaves no key material behind.
    pub fn generate_transport_key(
        &mut self,
        nickname: &str,
        algorithm: KeyAlgorithm,
        non_exportable: bool,
    ) -> Result<CeremonyReport> {
        self.require_free_nickname(nickname)?;

        let shares: Vec<KeyShare> = (0..SHARE_COUNT).map(|_| KeyShare::generate()).collect();
        self.store_combined(nickname, algorithm, &shares, non_exportable)
    }

    /// Generate a transport key from operator-entered shares
    pub fn input_generate_transport_key(
        &mut self,
        nickname: &str,
        algorithm: KeyAlgorithm,
        shares: &[KeyShare],
        non_exportable: bool,
    ) -> Result<CeremonyReport> {
        self.require_free_nickname(nickname)?;

        if shares.len() != SHARE_COUNT {
            return Err(Error::InvalidInput("exactly three shares are required"));
        }
        self.store_combined(nickname, algorithm, shares, non_exportable)
    }

    fn store_combined(
        &mut self,
        nickname: &str,
        algorithm: KeyAlgorithm,
        shares: &[KeyShare],
        non_exportable: bool,
    ) -> Result<CeremonyReport> {
        let handle = combine(self.provider, algorithm, shares)?;

        let report = self.finish_store(handle, nickname, non_exportable);
        if report.is_ok() {
            info!(nickname, ?algorithm, "transport key ceremony complete");
        }
        report
    }

    /// Generate a master key directly
    pub fn generate_master_key(
        &mut self,
        nickname: &str,
        algorithm: KeyAlgorithm,
        bits: Option<usize>,
    ) -> Result<CeremonyReport> {
        self.require_free_nickname(nickname)?;

        let bits = bits.unwrap_or_else(|| algorithm.default_bits());
        algorithm.validate_master_len(bits / 8)?;

        let handle = self.provider.generate_key(algorithm, bits)?;
        self.finish_store(handle, nickname, true)
    }

    fn finish_store(
        &mut self,
        handle: KeyHandle,
        nickname: &str,
        non_exportable: bool,
    ) -> Result<CeremonyReport> {
        let kcv = match self.provider.key_check_value(handle, self.kcv_length) {
            Ok(kcv) => kcv,
            Err(e) => {
                self.provider.destroy(handle);
                return Err(e);
            }
        };

        if let Err(e) = self.provider.store_key(handle, nickname, !non_exportable) {
            self.provider.destroy(handle);
            return Err(e);
        }

        Ok(CeremonyReport {
            nickname: nickname.to_string(),
            kcv,
        })
    }

    /// Wrap a stored master key under a stored transport key
    pub fn wrap_master_key(
        &mut self,
        transport_nickname: &str,
        master_nickname: &str,
    ) -> Result<WrappedKeyFile> {
        let transport = self
            .provider
            .find_key(transport_nickname)
            .ok_or_else(|| Error::KeyNotFound(transport_nickname.to_string()))?;
        let master = self
            .provider
            .find_key(master_nickname)
            .ok_or_else(|| Error::KeyNotFound(master_nickname.to_string()))?;

        let algorithm = self
            .provider
            .list_keys()
            .into_iter()
            .find(|k| k.nickname == master_nickname)
            .and_then(|k| k.algorithm)
            .ok_or_else(|| Error::Provider("master key has no algorithm".into()))?;

        let kcv = self.provider.key_check_value(master, self.kcv_length)?;
        let wrapped = self.provider.wrap_key(transport, master)?;

        info!(master = master_nickname, transport = transport_nickname, "wrapped master key");
        Ok(WrappedKeyFile {
            algorithm,
            kcv,
            wrapped,
        })
    }

    /// Unwrap a master key from a transport file and store it.
    ///
    /// The key is unwrapped to a session key first and its check value
    /// recomputed; only a matching check value lets the permanent store
    /// proceed. Master keys are stored non-extractable.
    pub fn unwrap_master_key(
        &mut self,
        transport_nickname: &str,
        master_nickname: &str,
        file: &WrappedKeyFile,
    ) -> Result<CeremonyReport> {
        self.require_free_nickname(master_nickname)?;

        let transport = self
            .provider
            .find_key(transport_nickname)
            .ok_or_else(|| Error::KeyNotFound(transport_nickname.to_string()))?;

        let candidate = self
            .provider
            .unwrap_key(transport, file.algorithm, &file.wrapped)?;

        let kcv = match self.provider.key_check_value(candidate, file.kcv.len()) {
            Ok(kcv) => kcv,
            Err(e) => {
                self.provider.destroy(candidate);
                return Err(e);
            }
        };
        if kcv != file.kcv {
            warn!(master = master_nickname, "check value mismatch, aborting unwrap");
            self.provider.destroy(candidate);
            return Err(Error::KcvMismatch);
        }

        self.finish_store(candidate, master_nickname, true)
    }

    /// Delete a stored key
    pub fn delete_key(&mut self, nickname: &str) -> Result<()> {
        self.provider.delete_key(nickname)
    }

    /// Rename a stored key
    pub fn rename_key(&mut self, nickname: &str, new_nickname: &str) -> Result<()> {
        self.provider.rename_key(nickname, new_nickname)
    }

    /// List stored keys
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.provider.list_keys()
    }

    /// Check value of a stored key, for operator display
    pub fn display_kcv(&self, nickname: &str) -> Result<Vec<u8>> {
        let handle = self
            .provider
            .find_key(nickname)
            .ok_or_else(|| Error::KeyNotFound(nickname.to_string()))?;
        self.provider.key_check_value(handle, self.kcv_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SoftProvider;

    #[test]
    fn generate_and_display() {
        let mut p = SoftProvider::new();
        let report = KeyCeremony::new(&mut p)
            .generate_transport_key("tkey1", KeyAlgorithm::Aes, false)
            .unwrap();

        assert_eq!(report.kcv.len(), DEFAULT_KCV_LENGTH);
        assert_eq!(KeyCeremony::new(&mut p).display_kcv("tkey1").unwrap(), report.kcv);
    }

    #[test]
    fn duplicate_keyname_aborts_before_shares() {
        let mut p = SoftProvider::new();
        KeyCeremony::new(&mut p)
            .generate_transport_key("tkey1", KeyAlgorithm::Aes, false)
            .unwrap();

        let err = KeyCeremony::new(&mut p)
            .generate_transport_key("tkey1", KeyAlgorithm::Aes, false)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKeyName(_)));
        // nothing new was written
        assert_eq!(p.list_keys().len(), 1);
    }

    #[test]
    fn operator_shares_round_trip() {
        let shares: Vec<KeyShare> = [
            "000102030405060708090a0b0c0d0e0f",
            "101112131415161718191a1b1c1d1e1f",
            "202122232425262728292a2b2c2d2e2f",
        ]
        .iter()
        .map(|s| KeyShare::from_hex(s).unwrap())
        .collect();

        let mut p1 = SoftProvider::new();
        let r1 = KeyCeremony::new(&mut p1)
            .input_generate_transport_key("tkey1", KeyAlgorithm::Aes, &shares, false)
            .unwrap();

        let shares2: Vec<KeyShare> = [
            "000102030405060708090a0b0c0d0e0f",
            "101112131415161718191a1b1c1d1e1f",
            "202122232425262728292a2b2c2d2e2f",
        ]
        .iter()
        .map(|s| KeyShare::from_hex(s).unwrap())
        .collect();

        let mut p2 = SoftProvider::new();
        let r2 = KeyCeremony::new(&mut p2)
            .input_generate_transport_key("tkey1", KeyAlgorithm::Aes, &shares2, false)
            .unwrap();

        // independent modules derive the same key from the same shares
        assert_eq!(r1.kcv, r2.kcv);
    }

    #[test]
    fn wrap_unwrap_between_modules() {
        let mut source = SoftProvider::new();
        let mut ceremony = KeyCeremony::new(&mut source);
        ceremony.generate_transport_key("tkey1", KeyAlgorithm::Aes, false).unwrap();
        let master = ceremony
            .generate_master_key("mkey", KeyAlgorithm::Des, Some(128))
            .unwrap();
        let file = ceremony.wrap_master_key("tkey1", "mkey").unwrap();

        // file round-trips through its serialized form
        let file = WrappedKeyFile::parse(&file.to_bytes()).unwrap();

        // the destination module holds the same transport key; here the
        // same provider stands in for it
        let report = KeyCeremony::new(&mut source)
            .unwrap_master_key("tkey1", "mkey2", &file)
            .unwrap();
        assert_eq!(report.kcv, master.kcv);

        // master keys land non-extractable
        let handle = source.find_key("mkey2").unwrap();
        assert!(source.key_bytes(handle).is_err());
    }

    #[test]
    fn kcv_mismatch_aborts_unwrap() {
        let mut p = SoftProvider::new();
        let mut ceremony = KeyCeremony::new(&mut p);
        ceremony.generate_transport_key("tkey1", KeyAlgorithm::Aes, false).unwrap();
        ceremony.generate_master_key("mkey", KeyAlgorithm::Aes, None).unwrap();
        let mut file = ceremony.wrap_master_key("tkey1", "mkey").unwrap();

        file.kcv[0] ^= 0xFF;

        let err = KeyCeremony::new(&mut p)
            .unwrap_master_key("tkey1", "mkey2", &file)
            .unwrap_err();
        assert!(matches!(err, Error::KcvMismatch));
        assert!(p.find_key("mkey2").is_none());
    }

    #[test]
    fn des_master_key_length_is_strict() {
        let mut p = SoftProvider::new();
        let err = KeyCeremony::new(&mut p)
            .generate_master_key("mkey", KeyAlgorithm::Des, Some(64))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn wrapped_file_parse_rejects_garbage() {
        assert!(WrappedKeyFile::parse(b"nope").is_err());
        assert!(WrappedKeyFile::parse(b"TKW1\x09\x00\x00\x00").is_err());
    }
}
