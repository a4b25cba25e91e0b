//! Software implementation of the crypto provider
//!
//! Keys live in memory, zeroized on drop; the operator tool persists the
//! store to disk between invocations. Wrapping uses CBC with a zero IV
//! and ISO 7816 padding so material of any legal length survives the
//! round trip.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use aes::{Aes128, Aes192, Aes256};
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use des::TdesEde3;
use k256::SecretKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::{Error, Result};

use super::{CryptoProvider, KeyAlgorithm, KeyHandle, KeyInfo, KeyPurpose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum RecordKind {
    Symmetric(KeyAlgorithm),
    KeyPair(KeyPurpose),
}

#[derive(Debug, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
struct Record {
    material: Vec<u8>,
    #[zeroize(skip)]
    kind: RecordKind,
    #[zeroize(skip)]
    nickname: Option<String>,
    extractable: bool,
}

impl Record {
    fn bits(&self) -> usize {
        self.material.len() * 8
    }
}

/// In-memory software key store
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SoftProvider {
    records: HashMap<u64, Record>,
    next_handle: u64,
}

impl SoftProvider {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store previously written with [`Self::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::Provider(format!("corrupt key store {}: {e}", path.display())))
    }

    /// Persist the store to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Provider(format!("serializing key store: {e}")))?;
        fs::write(path, raw)?;
        Ok(())
    }

    fn insert(&mut self, record: Record) -> KeyHandle {
        let handle = KeyHandle(self.next_handle);
        self.next_handle += 1;
        self.records.insert(handle.0, record);
        handle
    }

    fn record(&self, handle: KeyHandle) -> Result<&Record> {
        self.records
            .get(&handle.0)
            .ok_or_else(|| Error::Provider("stale key handle".into()))
    }

    fn symmetric(&self, handle: KeyHandle) -> Result<(&Record, KeyAlgorithm)> {
        let record = self.record(handle)?;
        match record.kind {
            RecordKind::Symmetric(alg) => Ok((record, alg)),
            RecordKind::KeyPair(_) => Err(Error::Provider("symmetric key required".into())),
        }
    }
}

impl CryptoProvider for SoftProvider {
    fn generate_key(&mut self, algorithm: KeyAlgorithm, bits: usize) -> Result<KeyHandle> {
        let len = bits / 8;
        algorithm.validate_master_len(len)?;

        let mut material = vec![0u8; len];
        rand::rng().fill_bytes(&mut material);

        Ok(self.insert(Record {
            material,
            kind: RecordKind::Symmetric(algorithm),
            nickname: None,
            extractable: true,
        }))
    }

    fn import_key(&mut self, algorithm: KeyAlgorithm, material: &[u8]) -> Result<KeyHandle> {
        algorithm.validate_master_len(material.len())?;
        Ok(self.insert(Record {
            material: material.to_vec(),
            kind: RecordKind::Symmetric(algorithm),
            nickname: None,
            extractable: true,
        }))
    }

    fn derive_xor_key(&mut self, base: KeyHandle, share: &[u8]) -> Result<KeyHandle> {
        let (record, algorithm) = self.symmetric(base)?;
        if record.material.len() != share.len() {
            return Err(Error::Provider(format!(
                "share length {} does not match key length {}",
                share.len(),
                record.material.len()
            )));
        }

        let material: Vec<u8> = record
            .material
            .iter()
            .zip(share)
            .map(|(k, s)| k ^ s)
            .collect();

        Ok(self.insert(Record {
            material,
            kind: RecordKind::Symmetric(algorithm),
            nickname: None,
            extractable: true,
        }))
    }

    fn store_key(&mut self, handle: KeyHandle, nickname: &str, extractable: bool) -> Result<()> {
        if self.find_key(nickname).is_some() {
            return Err(Error::DuplicateKeyName(nickname.into()));
        }

        let record = self
            .records
            .get_mut(&handle.0)
            .ok_or_else(|| Error::Provider("stale key handle".into()))?;
        record.nickname = Some(nickname.into());
        record.extractable = extractable;
        debug!(nickname, extractable, "stored key");
        Ok(())
    }

    fn find_key(&self, nickname: &str) -> Option<KeyHandle> {
        self.records
            .iter()
            .find(|(_, r)| r.nickname.as_deref() == Some(nickname))
            .map(|(id, _)| KeyHandle(*id))
    }

    fn delete_key(&mut self, nickname: &str) -> Result<()> {
        let handle = self
            .find_key(nickname)
            .ok_or_else(|| Error::KeyNotFound(nickname.into()))?;
        self.records.remove(&handle.0);
        Ok(())
    }

    fn rename_key(&mut self, nickname: &str, new_nickname: &str) -> Result<()> {
        if self.find_key(new_nickname).is_some() {
            return Err(Error::DuplicateKeyName(new_nickname.into()));
        }
        let handle = self
            .find_key(nickname)
            .ok_or_else(|| Error::KeyNotFound(nickname.into()))?;
        if let Some(record) = self.records.get_mut(&handle.0) {
            record.nickname = Some(new_nickname.into());
        }
        Ok(())
    }

    fn list_keys(&self) -> Vec<KeyInfo> {
        let mut keys: Vec<KeyInfo> = self
            .records
            .values()
            .filter_map(|r| {
                r.nickname.as_ref().map(|n| KeyInfo {
                    nickname: n.clone(),
                    algorithm: match r.kind {
                        RecordKind::Symmetric(alg) => Some(alg),
                        RecordKind::KeyPair(_) => None,
                    },
                    bits: r.bits(),
                    extractable: r.extractable,
                })
            })
            .collect();
        keys.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        keys
    }

    fn wrap_key(&mut self, wrapping: KeyHandle, target: KeyHandle) -> Result<Vec<u8>> {
        let (wrap_record, wrap_alg) = self.symmetric(wrapping)?;
        let cipher = CipherBox::for_key(wrap_alg, &wrap_record.material)?;
        let target_record = self.record(target)?;

        let mut data = target_record.material.clone();
        cipher.encrypt_padded(&mut data);
        Ok(data)
    }

    fn unwrap_key(
        &mut self,
        wrapping: KeyHandle,
        algorithm: KeyAlgorithm,
        wrapped: &[u8],
    ) -> Result<KeyHandle> {
        let (wrap_record, wrap_alg) = self.symmetric(wrapping)?;
        let cipher = CipherBox::for_key(wrap_alg, &wrap_record.material)?;

        let material = cipher.decrypt_padded(wrapped)?;
        self.import_key(algorithm, &material)
    }

    fn key_check_value(&self, handle: KeyHandle, len: usize) -> Result<Vec<u8>> {
        let (record, algorithm) = self.symmetric(handle)?;
        let cipher = CipherBox::for_key(algorithm, &record.material)?;

        let mut block = vec![0u8; cipher.block_len()];
        cipher.encrypt_block(&mut block);
        block.truncate(len.min(block.len()));
        Ok(block)
    }

    fn key_id(&self, handle: KeyHandle) -> Result<[u8; 20]> {
        let record = self.record(handle)?;
        let digest = Sha1::digest(&record.material);
        Ok(digest.into())
    }

    fn key_bytes(&self, handle: KeyHandle) -> Result<Zeroizing<Vec<u8>>> {
        let record = self.record(handle)?;
        if !record.extractable {
            return Err(Error::Provider("key is not extractable".into()));
        }
        Ok(Zeroizing::new(record.material.clone()))
    }

    fn destroy(&mut self, handle: KeyHandle) {
        self.records.remove(&handle.0);
    }

    fn generate_keypair(&mut self, purpose: KeyPurpose) -> Result<(KeyHandle, Vec<u8>)> {
        let secret = SecretKey::random(&mut rand_v8::rngs::OsRng);
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();

        let handle = self.insert(Record {
            material: secret.to_bytes().to_vec(),
            kind: RecordKind::KeyPair(purpose),
            nickname: None,
            extractable: true,
        });
        Ok((handle, public))
    }

    fn wrap_private_key(&mut self, kek: KeyHandle, keypair: KeyHandle) -> Result<Vec<u8>> {
        let record = self.record(keypair)?;
        if !matches!(record.kind, RecordKind::KeyPair(_)) {
            return Err(Error::Provider("key pair required".into()));
        }
        self.wrap_key(kek, keypair)
    }

    fn import_wrapped_keypair(
        &mut self,
        kek: KeyHandle,
        wrapped: &[u8],
    ) -> Result<(KeyHandle, Vec<u8>)> {
        let (wrap_record, wrap_alg) = self.symmetric(kek)?;
        let cipher = CipherBox::for_key(wrap_alg, &wrap_record.material)?;
        let material = cipher.decrypt_padded(wrapped)?;

        let secret = SecretKey::from_slice(&material)
            .map_err(|_| Error::Provider("recovered material is not a valid private key".into()))?;
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();

        let handle = self.insert(Record {
            material: material.to_vec(),
            kind: RecordKind::KeyPair(KeyPurpose::Encryption),
            nickname: None,
            extractable: true,
        });
        Ok((handle, public))
    }

    fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        rand::rng().fill_bytes(&mut out);
        out
    }
}

/// Block cipher dispatch for the supported wrapping algorithms.
///
/// A double-length DES key is widened to triple length by repeating its
/// first component, matching what legacy modules do before running the
/// 3DES mechanism.
enum CipherBox {
    Aes128(Box<Aes128>),
    Aes192(Box<Aes192>),
    Aes256(Box<Aes256>),
    Des3(Box<TdesEde3>),
}

impl CipherBox {
    fn for_key(algorithm: KeyAlgorithm, material: &[u8]) -> Result<Self> {
        match (algorithm, material.len()) {
            (KeyAlgorithm::Aes, 16) => Ok(Self::Aes128(Box::new(Aes128::new(
                GenericArray::from_slice(material),
            )))),
            (KeyAlgorithm::Aes, 24) => Ok(Self::Aes192(Box::new(Aes192::new(
                GenericArray::from_slice(material),
            )))),
            (KeyAlgorithm::Aes, 32) => Ok(Self::Aes256(Box::new(Aes256::new(
                GenericArray::from_slice(material),
            )))),
            (KeyAlgorithm::Des, 16) => {
                let mut widened = Zeroizing::new([0u8; 24]);
                widened[..16].copy_from_slice(material);
                widened[16..].copy_from_slice(&material[..8]);
                Ok(Self::Des3(Box::new(TdesEde3::new(GenericArray::from_slice(
                    widened.as_slice(),
                )))))
            }
            (KeyAlgorithm::Des, 24) => Ok(Self::Des3(Box::new(TdesEde3::new(
                GenericArray::from_slice(material),
            )))),
            (alg, len) => Err(Error::Provider(format!(
                "no cipher for {alg:?} key of {len} bytes"
            ))),
        }
    }

    const fn block_len(&self) -> usize {
        match self {
            Self::Des3(_) => 8,
            _ => 16,
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes192(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des3(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes192(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Aes256(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            Self::Des3(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    /// CBC with zero IV over ISO 7816 padded data, in place
    fn encrypt_padded(&self, data: &mut Vec<u8>) {
        let block_len = self.block_len();
        data.push(0x80);
        while data.len() % block_len != 0 {
            data.push(0x00);
        }

        let mut chain = vec![0u8; block_len];
        for block in data.chunks_exact_mut(block_len) {
            for (b, c) in block.iter_mut().zip(&chain) {
                *b ^= *c;
            }
            self.encrypt_block(block);
            chain.copy_from_slice(block);
        }
    }

    /// Inverse of [`Self::encrypt_padded`]
    fn decrypt_padded(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let block_len = self.block_len();
        if data.is_empty() || data.len() % block_len != 0 {
            return Err(Error::Provider("wrapped data is not block aligned".into()));
        }

        let mut out = Zeroizing::new(data.to_vec());
        let mut chain = vec![0u8; block_len];
        for block in out.chunks_exact_mut(block_len) {
            let next_chain = block.to_vec();
            self.decrypt_block(block);
            for (b, c) in block.iter_mut().zip(&chain) {
                *b ^= *c;
            }
            chain = next_chain;
        }

        // strip ISO 7816 padding
        while let Some(&0x00) = out.last() {
            out.pop();
        }
        if out.pop() != Some(0x80) {
            return Err(Error::Provider("bad padding in wrapped data".into()));
        }
        Ok(out)
    }
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherBox")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn store_and_find() {
        let mut p = SoftProvider::new();
        let k = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        p.store_key(k, "tkey1", true).unwrap();

        assert_eq!(p.find_key("tkey1"), Some(k));
        assert!(p.find_key("missing").is_none());
    }

    #[test]
    fn duplicate_nickname_refused() {
        let mut p = SoftProvider::new();
        let a = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        let b = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        p.store_key(a, "tkey1", true).unwrap();

        assert!(matches!(
            p.store_key(b, "tkey1", true),
            Err(Error::DuplicateKeyName(_))
        ));
    }

    #[test]
    fn xor_derivation() {
        let mut p = SoftProvider::new();
        let base = p
            .import_key(KeyAlgorithm::Aes, &hex!("00000000000000000000000000000000"))
            .unwrap();
        let derived = p
            .derive_xor_key(base, &hex!("0102030405060708090a0b0c0d0e0f10"))
            .unwrap();

        assert_eq!(
            p.key_bytes(derived).unwrap().as_slice(),
            hex!("0102030405060708090a0b0c0d0e0f10")
        );
    }

    #[test]
    fn xor_length_mismatch_refused() {
        let mut p = SoftProvider::new();
        let base = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        assert!(p.derive_xor_key(base, &[0u8; 8]).is_err());
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let mut p = SoftProvider::new();
        let kek = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        let master = p
            .import_key(KeyAlgorithm::Des, &hex!("404142434445464748494a4b4c4d4e4f"))
            .unwrap();

        let wrapped = p.wrap_key(kek, master).unwrap();
        let unwrapped = p.unwrap_key(kek, KeyAlgorithm::Des, &wrapped).unwrap();

        assert_eq!(
            p.key_bytes(unwrapped).unwrap().as_slice(),
            hex!("404142434445464748494a4b4c4d4e4f")
        );
    }

    #[test]
    fn kcv_is_deterministic() {
        let mut p = SoftProvider::new();
        let k = p
            .import_key(KeyAlgorithm::Aes, &hex!("000102030405060708090a0b0c0d0e0f"))
            .unwrap();

        let a = p.key_check_value(k, 4).unwrap();
        let b = p.key_check_value(k, 4).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn non_extractable_material_refused() {
        let mut p = SoftProvider::new();
        let k = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        p.store_key(k, "mkey", false).unwrap();

        assert!(p.key_bytes(k).is_err());
        // the KCV is still computable without extracting
        assert!(p.key_check_value(k, 4).is_ok());
    }

    #[test]
    fn rename_semantics() {
        let mut p = SoftProvider::new();
        let a = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        let b = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        p.store_key(a, "old", true).unwrap();
        p.store_key(b, "taken", true).unwrap();

        assert!(matches!(
            p.rename_key("old", "taken"),
            Err(Error::DuplicateKeyName(_))
        ));
        p.rename_key("old", "new").unwrap();
        assert!(p.find_key("old").is_none());
        assert!(p.find_key("new").is_some());
    }

    #[test]
    fn keypair_wrap_import_round_trip() {
        let mut p = SoftProvider::new();
        let kek = p.generate_key(KeyAlgorithm::Aes, 128).unwrap();
        let (pair, public) = p.generate_keypair(KeyPurpose::Encryption).unwrap();

        let wrapped = p.wrap_private_key(kek, pair).unwrap();
        let (_, recovered_public) = p.import_wrapped_keypair(kek, &wrapped).unwrap();
        assert_eq!(public, recovered_public);
    }

    #[test]
    fn des_master_length_validation() {
        let mut p = SoftProvider::new();
        assert!(p.import_key(KeyAlgorithm::Des, &[0u8; 16]).is_ok());
        assert!(p.import_key(KeyAlgorithm::Des, &[0u8; 24]).is_ok());
        assert!(p.import_key(KeyAlgorithm::Des, &[0u8; 8]).is_err());
        assert!(p.import_key(KeyAlgorithm::Des, &[0u8; 32]).is_err());
    }
}
