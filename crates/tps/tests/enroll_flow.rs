//! End-to-end enrollment scenarios against a simulated card.
//!
//! The simulator implements the card side of the channel protocol for
//! real: INITIALIZE UPDATE responses carry cryptograms computed from the
//! card's active key, so the whole mutual-authentication and key-upgrade
//! path is exercised, not stubbed.

use std::collections::HashMap;

use bytes::Bytes;
use hex_literal::hex;

use tokenkit_apdu::CardTransport;
use tokenkit_channel::TokenCard;
use tokenkit_channel::crypto::{
    CryptogramKind, DerivationPurpose, Scp02, calculate_cryptogram, derive_key,
};
use tokenkit_tps::ca::{CaConnector, CaError, EnrollmentRequest, IssuedCert, RecoveredKey};
use tokenkit_tps::config::{
    AppletConfig, KeySetConfig, KeyTypeConfig, PinConfig, PolicyConfig, ServiceConfig,
    TokenTypeConfig,
};
use tokenkit_tps::directory::{
    CertRecord, CertStatus, MemoryDirectory, TokenDirectory, TokenRecord, TokenStatus,
};
use tokenkit_tps::enroll::{
    AllowAll, DIRECTORY_OBJECT_ID, EnrollmentProcessor, EnrollmentRequest as EnrollRequest,
};
use tokenkit_tps::object_store::{ObjectSpec, ObjectStore, class};
use tokenkit_tps::provider::{CryptoProvider, KeyAlgorithm, SoftProvider};
use tokenkit_tps::{Error, PolicyRejection};

const DEFAULT_KEY: [u8; 16] = hex!("404142434445464748494a4b4c4d4e4f");
const MASTER_KEY: [u8; 16] = hex!("a0a1a2a3a4a5a6a7a8a9aaabacadaeaf");
const NOW: u64 = 700_000_000;

/// Simulated token: speaks the real channel handshake and stores
/// objects like the applet does.
#[derive(Debug)]
struct SimCard {
    active_key: [u8; 16],
    upgraded_key: [u8; 16],
    key_version: u8,
    cplc: [u8; 42],
    objects: HashMap<[u8; 4], Vec<u8>>,
    lifecycle: Option<u8>,
    pin_created: bool,
    free_memory: u32,
}

impl SimCard {
    fn blank() -> Self {
        let mut cplc = [0u8; 42];
        cplc[..32].copy_from_slice(&hex!(
            "4790516838479122334455667788990a0b0c0d0e0f101112131415161718191a"
        ));
        Self {
            active_key: DEFAULT_KEY,
            upgraded_key: MASTER_KEY,
            key_version: 0x20,
            cplc,
            objects: HashMap::new(),
            lifecycle: None,
            pin_created: false,
            free_memory: 20_000,
        }
    }

    /// A card that already went through a key upgrade
    fn upgraded() -> Self {
        let mut card = Self::blank();
        card.active_key = MASTER_KEY;
        card.key_version = 0x21;
        card.pin_created = true;
        card
    }

    fn ok(payload: &[u8]) -> Bytes {
        let mut out = payload.to_vec();
        out.extend_from_slice(&[0x90, 0x00]);
        Bytes::from(out)
    }

    fn status(sw1: u8, sw2: u8) -> Bytes {
        Bytes::from(vec![sw1, sw2])
    }

    fn init_update(&self, p1: u8, host_challenge: &[u8]) -> Bytes {
        if p1 != self.key_version {
            return Self::status(0x6A, 0x88);
        }

        let seq = [0x00, 0x0d];
        let card_challenge = hex!("e9c62ba1c4c8");
        let mut host = [0u8; 8];
        host.copy_from_slice(&host_challenge[..8]);

        let key = cipher::Key::<Scp02>::clone_from_slice(&self.active_key);
        let enc = derive_key(&key, &seq, DerivationPurpose::Enc);
        let cryptogram =
            calculate_cryptogram(&enc, &seq, &card_challenge, &host, CryptogramKind::Card);

        let mut payload = Vec::with_capacity(28);
        payload.extend_from_slice(&hex!("00000265018303953662")); // diversification
        payload.push(self.key_version);
        payload.push(0x02); // SCP02
        payload.extend_from_slice(&seq);
        payload.extend_from_slice(&card_challenge);
        payload.extend_from_slice(&cryptogram);
        Self::ok(&payload)
    }
}

impl CardTransport for SimCard {
    fn transmit_raw(&mut self, command: &[u8]) -> tokenkit_apdu::Result<Bytes> {
        let cla = command[0];
        let ins = command[1];
        let p1 = command[2];
        let p2 = command[3];

        let mut data: &[u8] = if command.len() > 5 {
            let lc = command[4] as usize;
            &command[5..(5 + lc).min(command.len())]
        } else {
            &[]
        };
        // strip the channel MAC from secured commands
        if cla & 0x04 != 0 && data.len() >= 8 {
            data = &data[..data.len() - 8];
        }

        let response = match ins {
            0xA4 => Self::ok(&[]),
            0xCA if p1 == 0x9F && p2 == 0x7F => Self::ok(&self.cplc.clone()),
            0x3C => {
                let mut payload = vec![0x01, 0x00, 0x01, 0x03];
                payload.extend_from_slice(&0x8000u32.to_be_bytes());
                payload.extend_from_slice(&self.free_memory.to_be_bytes());
                Self::ok(&payload)
            }
            0x50 => self.init_update(p1, data),
            0x82 => Self::ok(&[]),
            0xD8 => {
                self.key_version = data[0];
                self.active_key = self.upgraded_key;
                Self::ok(&[])
            }
            0x5A => {
                let id: [u8; 4] = data[0..4].try_into().unwrap();
                let size = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
                self.objects.insert(id, vec![0u8; size]);
                Self::ok(&[])
            }
            0x54 => {
                let id: [u8; 4] = data[0..4].try_into().unwrap();
                let offset = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
                let len = data[8] as usize;
                let chunk = &data[9..9 + len];
                let object = self.objects.entry(id).or_default();
                if object.len() < offset + len {
                    object.resize(offset + len, 0);
                }
                object[offset..offset + len].copy_from_slice(chunk);
                Self::ok(&[])
            }
            0x56 => {
                let id: [u8; 4] = data[0..4].try_into().unwrap();
                let offset = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
                let len = data[8] as usize;
                match self.objects.get(&id) {
                    None => Self::status(0x6A, 0x82),
                    Some(object) => {
                        let end = (offset + len).min(object.len());
                        if offset >= object.len() {
                            Self::status(0x6A, 0x86)
                        } else {
                            Self::ok(&object[offset..end])
                        }
                    }
                }
            }
            0xF0 => {
                self.lifecycle = Some(p2);
                Self::ok(&[])
            }
            0x04 => {
                if self.pin_created {
                    Self::ok(&[])
                } else {
                    Self::status(0x6A, 0x88)
                }
            }
            0x40 => {
                self.pin_created = true;
                Self::ok(&[])
            }
            0x0A | 0xF4 => Self::ok(&[]),
            _ => Self::ok(&[]),
        };
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn reset(&mut self) -> tokenkit_apdu::Result<()> {
        Ok(())
    }
}

/// CA double issuing predictable serials
#[derive(Debug, Default)]
struct MockCa {
    next_serial: u32,
}

impl CaConnector for MockCa {
    fn enroll(&mut self, request: &EnrollmentRequest) -> Result<IssuedCert, CaError> {
        self.next_serial += 1;
        Ok(IssuedCert {
            serial: format!("{:08x}", self.next_serial),
            der: [b"cert:", request.profile.as_bytes()].concat(),
            not_before: NOW,
            not_after: NOW + 86_400 * 365,
        })
    }

    fn renew(&mut self, serial: &str, profile: &str) -> Result<IssuedCert, CaError> {
        self.next_serial += 1;
        Ok(IssuedCert {
            serial: format!("{:08x}", self.next_serial),
            der: [b"renewed:", serial.as_bytes(), b":", profile.as_bytes()].concat(),
            not_before: NOW,
            not_after: NOW + 86_400 * 365,
        })
    }

    fn revoke(&mut self, _serial: &str, _reason: tokenkit_tps::ca::RevocationReason) -> Result<(), CaError> {
        Ok(())
    }

    fn recover_key(&mut self, serial: &str) -> Result<RecoveredKey, CaError> {
        Err(CaError::Rejected(format!("no archive for {serial}")))
    }
}

fn service_config() -> ServiceConfig {
    let mut token_types = std::collections::BTreeMap::new();
    token_types.insert(
        "userKey".to_string(),
        TokenTypeConfig {
            key_types: vec![
                KeyTypeConfig {
                    name: "signing".into(),
                    purpose: tokenkit_tps::provider::KeyPurpose::Signature,
                    profile: "tokenSigning".into(),
                },
                KeyTypeConfig {
                    name: "encryption".into(),
                    purpose: tokenkit_tps::provider::KeyPurpose::Encryption,
                    profile: "tokenEncryption".into(),
                },
            ],
        },
    );

    ServiceConfig {
        applet: AppletConfig {
            target_version: "1.3".into(),
            enable_update: false,
            package_aid: "A000000001".into(),
            instance_aid: "A00000000101".into(),
            load_file: String::new(),
        },
        keys: KeySetConfig {
            required_version: 0x21,
            key_index: 0,
            enable_update: true,
            master_key_name: "mkey".into(),
            default_version: 0x20,
            default_key: hex::encode(DEFAULT_KEY),
        },
        pin: PinConfig {
            reset_enabled: true,
            create_if_missing: true,
            min_length: 6,
            max_length: 10,
            max_attempts: 5,
        },
        policy: PolicyConfig {
            allow_unknown_token: true,
            renewal_enabled: true,
            reenroll_enabled: false,
            grace_before_days: 30,
            grace_after_days: 30,
            recovery_scheme: "RecoverLast".into(),
            temporary_token_type: "userKey".into(),
        },
        token_types,
        default_token_type: "userKey".into(),
        issuer_info: "Example Corp Token Service".into(),
        authentication_enabled: false,
        force_format_on_overflow: true,
    }
}

fn provider_with_master() -> SoftProvider {
    let mut provider = SoftProvider::new();
    let handle = provider.import_key(KeyAlgorithm::Aes, &MASTER_KEY).unwrap();
    provider.store_key(handle, "mkey", true).unwrap();
    provider
}

fn applet_aid() -> Vec<u8> {
    hex!("A00000000101").to_vec()
}

#[test]
fn fresh_enrollment_provisions_every_key_type() {
    let config = service_config();
    let mut provider = provider_with_master();
    let mut directory = MemoryDirectory::new();
    let mut ca = MockCa::default();

    let mut card = TokenCard::new(SimCard::blank(), applet_aid());
    let receipt = EnrollmentProcessor::new(
        &config,
        &mut provider,
        &mut directory,
        &mut ca,
        &AllowAll,
    )
    .process(
        &mut card,
        &EnrollRequest {
            userid: "jdoe".into(),
            token_type: None,
            now: NOW,
        },
    )
    .unwrap();

    // one credential per configured key type, all originating here
    assert_eq!(receipt.path, "fresh");
    assert_eq!(receipt.credentials.len(), 2);
    assert!(receipt.credentials.iter().all(|c| c.origin_cuid == receipt.cuid));
    assert_eq!(receipt.key_version, 0x21);

    // directory committed the active record
    let record = directory.find_token(&receipt.cuid).unwrap().unwrap();
    assert_eq!(record.status, TokenStatus::Active);
    assert_eq!(record.key_version, 0x21);

    // success audit record written
    let last = directory.activities().last().unwrap();
    assert_eq!(last.outcome, tokenkit_tps::audit::ActivityOutcome::Success);
}

#[test]
fn fresh_enrollment_writes_card_state() {
    let config = service_config();
    let mut provider = provider_with_master();
    let mut directory = MemoryDirectory::new();
    let mut ca = MockCa::default();

    let mut card = TokenCard::new(SimCard::blank(), applet_aid());
    EnrollmentProcessor::new(&config, &mut provider, &mut directory, &mut ca, &AllowAll)
        .process(
            &mut card,
            &EnrollRequest {
                userid: "jdoe".into(),
                token_type: None,
                now: NOW,
            },
        )
        .unwrap();

    let sim = card.into_transport();

    // lifecycle moved to provisioned, the PIN exists, key set upgraded
    assert_eq!(sim.lifecycle, Some(0x0F));
    assert!(sim.pin_created);
    assert_eq!(sim.key_version, 0x21);

    // the object directory round-trips and carries both credentials
    let blob = sim.objects.get(&DIRECTORY_OBJECT_ID).unwrap();
    let store = ObjectStore::parse(blob).unwrap();
    assert_eq!(store.object_spec_count(), 6);
    assert!(store.get(&[class::CERTIFICATE, b'0']).is_some());
    assert!(store.get(&[class::CERTIFICATE, b'1']).is_some());
    assert_eq!(store.token_name(), "jdoe");
}

#[test]
fn renewal_keeps_old_encryption_certificate() {
    let config = service_config();
    let mut provider = provider_with_master();
    let mut directory = MemoryDirectory::new();
    let mut ca = MockCa::default();

    let mut sim = SimCard::upgraded();
    let cuid = "6838-4791-2233-4455-6677";

    // seed the directory with an active token and its two certificates
    directory
        .add_token(TokenRecord {
            cuid: cuid.into(),
            userid: "jdoe".into(),
            status: TokenStatus::Active,
            applet_version: "1.3".into(),
            key_version: 0x21,
            modified_at: NOW - 1000,
        })
        .unwrap();
    directory
        .update_certificates(&[
            CertRecord {
                serial: "0000aaaa".into(),
                origin_cuid: cuid.into(),
                token_cuid: cuid.into(),
                key_type: "signing".into(),
                profile: "tokenSigning".into(),
                status: CertStatus::Active,
                suffix: b'0',
                not_before: NOW - 86_400 * 300,
                not_after: NOW + 86_400 * 10, // inside the grace window
                der: b"old-signing".to_vec(),
            },
            CertRecord {
                serial: "0000bbbb".into(),
                origin_cuid: cuid.into(),
                token_cuid: cuid.into(),
                key_type: "encryption".into(),
                profile: "tokenEncryption".into(),
                status: CertStatus::Active,
                suffix: b'1',
                not_before: NOW - 86_400 * 300,
                not_after: NOW + 86_400 * 10,
                der: b"old-encryption".to_vec(),
            },
        ])
        .unwrap();

    // seed the card with the matching object directory
    let cuid_bytes: [u8; 10] = hex!("68384791223344556677");
    let mut old_store = ObjectStore::new(cuid_bytes, "jdoe", 0x42);
    for (suffix, der) in [(b'0', b"old-signing".to_vec()), (b'1', b"old-encryption".to_vec())] {
        old_store
            .add_object_spec(ObjectSpec::new(class::CERTIFICATE, suffix, der))
            .unwrap();
        let mut attrs = Vec::new();
        tokenkit_tps::object_store::put_attribute(
            &mut attrs,
            tokenkit_tps::object_store::attr::LABEL,
            b"jdoe",
        );
        old_store
            .add_object_spec(ObjectSpec::new(class::CERT_ATTRIBUTES, suffix, attrs))
            .unwrap();
    }
    // patch the simulated CPLC so the derived CUID matches the records
    sim.cplc[3..7].copy_from_slice(&cuid_bytes[..4]);
    sim.cplc[19..21].copy_from_slice(&cuid_bytes[4..6]);
    sim.cplc[15..19].copy_from_slice(&cuid_bytes[6..10]);
    sim.objects
        .insert(DIRECTORY_OBJECT_ID, old_store.serialize(true).unwrap().to_vec());

    let mut card = TokenCard::new(sim, applet_aid());
    let receipt =
        EnrollmentProcessor::new(&config, &mut provider, &mut directory, &mut ca, &AllowAll)
            .process(
                &mut card,
                &EnrollRequest {
                    userid: "jdoe".into(),
                    token_type: None,
                    now: NOW,
                },
            )
            .unwrap();

    assert_eq!(receipt.path, "renewal");
    assert_eq!(receipt.credentials.len(), 2);

    let sim = card.into_transport();
    let store = ObjectStore::parse(sim.objects.get(&DIRECTORY_OBJECT_ID).unwrap()).unwrap();

    // signing renewed in place; the old encryption certificate stays on
    // the token next to its replacement
    assert_eq!(
        store.get(&[class::CERTIFICATE, b'0']).unwrap().data,
        b"renewed:0000aaaa:tokenSigning".to_vec()
    );
    assert_eq!(
        store.get(&[class::CERTIFICATE, b'1']).unwrap().data,
        b"old-encryption".to_vec()
    );
    assert_eq!(
        store.get(&[class::CERTIFICATE, b'2']).unwrap().data,
        b"renewed:0000bbbb:tokenEncryption".to_vec()
    );
}

#[test]
fn terminated_token_is_rejected_with_failure_audit() {
    let config = service_config();
    let mut provider = provider_with_master();
    let mut directory = MemoryDirectory::new();
    let mut ca = MockCa::default();

    let cuid = "6838-4791-2233-4455-6677";
    directory
        .add_token(TokenRecord {
            cuid: cuid.into(),
            userid: "jdoe".into(),
            status: TokenStatus::Terminated,
            applet_version: "1.3".into(),
            key_version: 0x21,
            modified_at: NOW - 1000,
        })
        .unwrap();

    let mut sim = SimCard::upgraded();
    let cuid_bytes: [u8; 10] = hex!("68384791223344556677");
    sim.cplc[3..7].copy_from_slice(&cuid_bytes[..4]);
    sim.cplc[19..21].copy_from_slice(&cuid_bytes[4..6]);
    sim.cplc[15..19].copy_from_slice(&cuid_bytes[6..10]);

    let mut card = TokenCard::new(sim, applet_aid());
    let err =
        EnrollmentProcessor::new(&config, &mut provider, &mut directory, &mut ca, &AllowAll)
            .process(
                &mut card,
                &EnrollRequest {
                    userid: "jdoe".into(),
                    token_type: None,
                    now: NOW,
                },
            )
            .unwrap_err();

    assert!(matches!(err, Error::Policy(PolicyRejection::Terminated)));

    // nothing was provisioned and the failure was audited
    let sim = card.into_transport();
    assert_eq!(sim.lifecycle, None);
    let last = directory.activities().last().unwrap();
    assert_eq!(last.outcome, tokenkit_tps::audit::ActivityOutcome::Failure);
    assert_eq!(last.cuid, cuid);
}
