//! Token enrollment orchestration
//!
//! One [`EnrollmentProcessor`] drives one enrollment session end to end:
//! card identity, policy decision, applet and key upgrades, PIN reset,
//! certificate issuance, the object directory rewrite and the final
//! lifecycle commit. Steps run strictly in order; any failure funnels
//! into a single cleanup path that closes the channel exactly once and
//! writes a failure audit record. Nothing the card already committed is
//! rolled back — card writes are irreversible.

use rand::Rng;
use sha1::{Digest, Sha1};
use tokenkit_apdu::CardTransport;
use tokenkit_channel::{ChannelState, Keys, TokenCard, constants::lifecycle, format_cuid};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::audit::ActivityRecord;
use crate::ca::{CaConnector, CaError, EnrollmentRequest as CaRequest};
use crate::config::{KeyTypeConfig, ServiceConfig};
use crate::directory::{
    CertFilter, CertRecord, CertStatus, TokenDirectory, TokenRecord, TokenStatus,
    allowed_transition,
};
use crate::object_store::{ObjectSpec, ObjectStore, attr, class, fixed_attributes, put_attribute};
use crate::policy::{EnrollmentPath, PolicyEngine, RecoveryScheme};
use crate::provider::{CryptoProvider, KeyHandle, KeyPurpose};
use crate::{Error, PolicyRejection, Result};

/// Card object holding the serialized object directory
pub const DIRECTORY_OBJECT_ID: [u8; 4] = *b"z0\x00\x00";

/// User authentication hook; the production implementation binds to the
/// directory server, tests allow everyone.
pub trait UserAuthenticator {
    /// Authenticate `userid`, failing the enrollment on refusal
    fn authenticate(&self, userid: &str) -> Result<()>;
}

/// Authenticator that accepts every user (authentication disabled or
/// handled upstream)
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl UserAuthenticator for AllowAll {
    fn authenticate(&self, _userid: &str) -> Result<()> {
        Ok(())
    }
}

/// One enrollment request
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    /// Requesting user
    pub userid: String,
    /// Token type override; the configured default applies otherwise
    pub token_type: Option<String>,
    /// Current time, seconds; callers supply the clock
    pub now: u64,
}

/// One issued or recovered credential in the receipt
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// Certificate serial
    pub serial: String,
    /// Key type name from the provisioning plan
    pub key_type: String,
    /// CUID of the token the key pair originated on; differs from the
    /// enrolled token for recovered credentials
    pub origin_cuid: String,
    /// Credential suffix digit on the token
    pub suffix: u8,
}

/// Successful enrollment summary
#[derive(Debug, Clone)]
pub struct EnrollmentReceipt {
    /// Token CUID, dashed
    pub cuid: String,
    /// Token type that was provisioned
    pub token_type: String,
    /// Which path the enrollment took
    pub path: &'static str,
    /// Card key version after the session
    pub key_version: u8,
    /// Credentials now on the token from this session
    pub credentials: Vec<IssuedCredential>,
}

/// Per-session working state, torn down with the session
struct EnrollmentContext {
    cuid_str: String,
    userid: String,
    token_type: String,
    applet_version: String,
    key_version: u8,
    challenge: Vec<u8>,
    credentials: Vec<IssuedCredential>,
    cert_records: Vec<CertRecord>,
}

/// Drives enrollment sessions against one set of collaborators
pub struct EnrollmentProcessor<'a, A: UserAuthenticator> {
    config: &'a ServiceConfig,
    provider: &'a mut dyn CryptoProvider,
    directory: &'a mut dyn TokenDirectory,
    ca: &'a mut dyn CaConnector,
    authenticator: &'a A,
}

impl<A: UserAuthenticator> std::fmt::Debug for EnrollmentProcessor<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnrollmentProcessor")
    }
}

impl<'a, A: UserAuthenticator> EnrollmentProcessor<'a, A> {
    /// Create a processor for one session's collaborators
    pub fn new(
        config: &'a ServiceConfig,
        provider: &'a mut dyn CryptoProvider,
        directory: &'a mut dyn TokenDirectory,
        ca: &'a mut dyn CaConnector,
        authenticator: &'a A,
    ) -> Self {
        Self {
            config,
            provider,
            directory,
            ca,
            authenticator,
        }
    }

    /// Run one enrollment session.
    ///
    /// Whatever happens inside, the channel is closed exactly once and a
    /// terminal audit record is written before this returns.
    pub fn process<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        request: &EnrollmentRequest,
    ) -> Result<EnrollmentReceipt> {
        self.config.validate()?;

        let mut observed_cuid = String::from("unknown");
        let result = self.run(card, request, &mut observed_cuid);

        if card.channel_state() != ChannelState::Closed {
            if let Err(e) = card.close() {
                warn!(error = %e, "closing channel after enrollment failed");
            }
        }

        match result {
            Ok(receipt) => {
                let record = ActivityRecord::success(
                    "enrollment",
                    &receipt.cuid,
                    &request.userid,
                    format!(
                        "{} enrollment issued {} credentials",
                        receipt.path,
                        receipt.credentials.len()
                    ),
                );
                if let Err(e) = self.directory.record_activity(&record) {
                    warn!(error = %e, "writing success audit record failed");
                }
                Ok(receipt)
            }
            Err(e) => {
                let record = ActivityRecord::failure(
                    "enrollment",
                    &observed_cuid,
                    &request.userid,
                    e.to_string(),
                );
                if let Err(audit_err) = self.directory.record_activity(&record) {
                    warn!(error = %audit_err, "writing failure audit record failed");
                }
                Err(e)
            }
        }
    }

    fn run<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        request: &EnrollmentRequest,
        observed_cuid: &mut String,
    ) -> Result<EnrollmentReceipt> {
        // 1. card identity
        let info = card.applet_info()?;
        let cuid_str = format_cuid(&info.cuid);
        observed_cuid.clone_from(&cuid_str);
        info!(cuid = %cuid_str, userid = %request.userid, "enrollment started");

        // 2-3. policy decision and transition screen. The decision runs
        // before the generic transition check so status-specific
        // rejections (key compromise, terminated) surface as themselves.
        let engine = PolicyEngine::new(&self.config.policy);
        let path = engine.decide(self.directory, &request.userid, &cuid_str)?;

        let existing = self.directory.find_token(&cuid_str)?;
        if let Some(record) = &existing {
            if !allowed_transition(record.status, TokenStatus::Active) {
                return Err(PolicyRejection::IllegalTransition {
                    from: record.status.name(),
                    to: "active",
                }
                .into());
            }
        }

        let mut token_type = self
            .config
            .resolve_token_type(request.token_type.as_deref())?
            .to_string();
        if let EnrollmentPath::Recovery {
            token_type_override: Some(override_type),
            ..
        } = &path
        {
            token_type = self
                .config
                .resolve_token_type(Some(override_type.as_str()))?
                .to_string();
        }

        // 4. user authentication
        if self.config.authentication_enabled {
            self.authenticator.authenticate(&request.userid)?;
        }

        let mut ctx = EnrollmentContext {
            cuid_str: cuid_str.clone(),
            userid: request.userid.clone(),
            token_type: token_type.clone(),
            applet_version: info.status.applet_version_string(),
            key_version: 0,
            challenge: Vec::new(),
            credentials: Vec::new(),
            cert_records: Vec::new(),
        };

        // 5. applet upgrade
        if self.config.applet.enable_update
            && !ctx
                .applet_version
                .eq_ignore_ascii_case(&self.config.applet.target_version)
        {
            let package_aid = hex::decode(&self.config.applet.package_aid)
                .map_err(|_| Error::Config("package AID is not valid hex".into()))?;
            let load_file = hex::decode(&self.config.applet.load_file)
                .map_err(|_| Error::Config("applet load file is not valid hex".into()))?;
            card.upgrade_applet(&package_aid, &load_file)?;
            ctx.applet_version = self.config.applet.target_version.clone();
        }

        // 6. symmetric key upgrade and channel establishment
        ctx.key_version = self.establish_channel(card)?;

        // 7. PIN reset. The PIN buffer zeroizes when it drops, on every
        // path out of this block.
        if self.config.pin.reset_enabled {
            let pin = generate_pin(self.config.pin.min_length, self.config.pin.max_length);
            match card.set_pin(0, &pin) {
                Ok(()) => {}
                Err(_) if self.config.pin.create_if_missing => {
                    card.create_pin(0, self.config.pin.max_attempts, &pin)?;
                }
                Err(e) => return Err(e.into()),
            }
            debug!(pin_length = pin.len(), "token PIN reset");
        }

        // 8. enrollment challenge bound to key diversification data
        let diversification = card
            .diversification_data()
            .ok_or(Error::Config("channel open but no diversification data".into()))?;
        ctx.challenge = make_challenge(&diversification, &self.provider.random_bytes(16));

        // 9. object directory continuity
        let mut store = match self.read_existing_store(card) {
            Some(old) => {
                debug!(version = old.object_version(), "continuing existing object directory");
                let mut store =
                    ObjectStore::new(info.cuid, &request.userid, old.object_version());
                for spec in old.specs() {
                    store.add_object_spec(spec.clone())?;
                }
                store
            }
            None => {
                let version =
                    ObjectStore::generate_object_version(|| rand::rng().random::<u8>());
                ObjectStore::new(info.cuid, &request.userid, version)
            }
        };

        // 10. certificate issuance per path
        let path_name = match &path {
            EnrollmentPath::Fresh => {
                self.issue_all(card, &mut store, &mut ctx)?;
                "fresh"
            }
            EnrollmentPath::Reenroll => {
                self.issue_all(card, &mut store, &mut ctx)?;
                "reenroll"
            }
            EnrollmentPath::Renewal { certs } => {
                self.renew_all(card, &mut store, &mut ctx, &engine, certs, request.now)?;
                "renewal"
            }
            EnrollmentPath::Recovery {
                scheme,
                source_cuid,
                ..
            } => {
                self.recover_all(card, &mut store, &mut ctx, *scheme, source_cuid)?;
                "recovery"
            }
        };

        // 11. object directory rewrite, size checked first
        self.write_store(card, &store)?;

        // issuer banner travels with every successful provisioning
        card.set_issuer_info(self.config.issuer_info.as_bytes())?;

        // 12. lifecycle commit on the card
        card.set_lifecycle(lifecycle::PROVISIONED)?;

        // 13. directory commit
        let record = TokenRecord {
            cuid: cuid_str.clone(),
            userid: request.userid.clone(),
            status: TokenStatus::Active,
            applet_version: ctx.applet_version.clone(),
            key_version: ctx.key_version,
            modified_at: request.now,
        };
        if existing.is_some() {
            self.directory.update_token(record)?;
        } else {
            self.directory.add_token(record)?;
        }
        self.directory.update_certificates(&ctx.cert_records)?;

        info!(
            cuid = %cuid_str,
            path = path_name,
            credentials = ctx.credentials.len(),
            "enrollment complete"
        );

        Ok(EnrollmentReceipt {
            cuid: cuid_str,
            token_type,
            path: path_name,
            key_version: ctx.key_version,
            credentials: ctx.credentials,
        })
    }

    /// Open the channel at the required key version, running a PutKey
    /// ceremony first when the card is still on its default keys.
    fn establish_channel<T: CardTransport>(&mut self, card: &mut TokenCard<T>) -> Result<u8> {
        let required = self.config.keys.required_version;
        let index = self.config.keys.key_index;
        let master_keys = self.master_card_keys()?;

        match card.open_channel(&master_keys, required, index) {
            Ok(key_set) => return Ok(key_set.version),
            Err(e) => {
                // Only a refused INITIALIZE UPDATE is retryable at the
                // default version; an authentication failure is fatal.
                if card.channel_state() != ChannelState::Unauthenticated
                    || !self.config.keys.enable_update
                {
                    return Err(e.into());
                }
                debug!(required, "card refused required key version, upgrading");
            }
        }

        let default_keys = Keys::from_single_key(self.config.default_card_key()?);
        let reported = card.open_channel(&default_keys, self.config.keys.default_version, index)?;

        // The reported (version, index) pair is the rollback anchor: if
        // the put fails the card is still on this known default set.
        if let Err(e) = card.put_key_set(reported.version, required, &master_keys) {
            warn!(
                rollback_version = reported.version,
                "PUT KEY failed; card remains on its default key set"
            );
            return Err(e.into());
        }

        // fresh open/close pair at the new version
        card.close()?;
        card.reset_session()?;
        let key_set = card.open_channel(&master_keys, required, index)?;
        Ok(key_set.version)
    }

    /// Card keys backing the required version, sourced from the named
    /// provider master key.
    fn master_card_keys(&self) -> Result<Keys> {
        let handle = self
            .provider
            .find_key(&self.config.keys.master_key_name)
            .ok_or_else(|| Error::KeyNotFound(self.config.keys.master_key_name.clone()))?;
        let bytes = self.provider.key_bytes(handle)?;
        let key: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Config("master card key must be 16 bytes".into()))?;
        Ok(Keys::from_single_key(key))
    }

    fn kek_handle(&self) -> Result<KeyHandle> {
        self.provider
            .find_key(&self.config.keys.master_key_name)
            .ok_or_else(|| Error::KeyNotFound(self.config.keys.master_key_name.clone()))
    }

    /// Issue one credential of `key_type`, writing card objects and
    /// queueing directory records.
    fn issue_one<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &mut ObjectStore,
        ctx: &mut EnrollmentContext,
        key_type: &KeyTypeConfig,
        slot: u8,
    ) -> Result<()> {
        let (pair, public) = self.provider.generate_keypair(key_type.purpose)?;

        let request = CaRequest {
            profile: key_type.profile.clone(),
            userid: ctx.userid.clone(),
            cuid: ctx.cuid_str.clone(),
            public_key: public.clone(),
            purpose: key_type.purpose,
            challenge: ctx.challenge.clone(),
        };
        let issued = match self.ca.enroll(&request) {
            Ok(issued) => issued,
            Err(e) => {
                self.provider.destroy(pair);
                return Err(Error::Ca(e.to_string()));
            }
        };

        let origin = ctx.cuid_str.clone();
        let result =
            self.place_credential(card, store, ctx, key_type, pair, &public, issued, &origin, slot);
        self.provider.destroy(pair);
        result
    }

    /// Write a credential's key and objects to the card and queue its
    /// records. `origin_cuid` differs from the enrolled token for
    /// recovered credentials.
    #[allow(clippy::too_many_arguments)]
    fn place_credential<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &mut ObjectStore,
        ctx: &mut EnrollmentContext,
        key_type: &KeyTypeConfig,
        pair: KeyHandle,
        public: &[u8],
        issued: crate::ca::IssuedCert,
        origin_cuid: &str,
        slot: u8,
    ) -> Result<()> {
        let suffix = store.next_free_suffix(class::CERTIFICATE)?;
        let key_id = self.provider.key_id(pair)?;

        let kek = self.kek_handle()?;
        let wrapped = self.provider.wrap_private_key(kek, pair)?;
        card.import_wrapped_key(slot, &wrapped)?;

        add_credential_objects(
            store,
            suffix,
            &format!("{} {}", ctx.userid, key_type.name),
            &issued.der,
            &key_id,
            public,
        )?;

        ctx.credentials.push(IssuedCredential {
            serial: issued.serial.clone(),
            key_type: key_type.name.clone(),
            origin_cuid: origin_cuid.to_string(),
            suffix,
        });
        ctx.cert_records.push(CertRecord {
            serial: issued.serial,
            origin_cuid: origin_cuid.to_string(),
            token_cuid: ctx.cuid_str.clone(),
            key_type: key_type.name.clone(),
            profile: key_type.profile.clone(),
            status: CertStatus::Active,
            suffix,
            not_before: issued.not_before,
            not_after: issued.not_after,
            der: issued.der,
        });
        Ok(())
    }

    fn issue_all<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &mut ObjectStore,
        ctx: &mut EnrollmentContext,
    ) -> Result<()> {
        let key_types = self.config.key_types(&ctx.token_type)?.to_vec();
        for (slot, key_type) in key_types.iter().enumerate() {
            self.issue_one(card, store, ctx, key_type, slot as u8)?;
        }
        Ok(())
    }

    /// Renew each certificate individually. A grace-window miss or a
    /// per-certificate CA rejection skips that certificate and moves
    /// on; a connector failure aborts the whole renewal.
    fn renew_all<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &mut ObjectStore,
        ctx: &mut EnrollmentContext,
        engine: &PolicyEngine<'_>,
        certs: &[CertRecord],
        now: u64,
    ) -> Result<()> {
        let key_types = self.config.key_types(&ctx.token_type)?.to_vec();

        for (slot, cert) in certs.iter().enumerate() {
            if !engine.within_grace_window(cert.not_after, now) {
                info!(serial = %cert.serial, "outside grace window, skipped");
                continue;
            }

            let issued = match self.ca.renew(&cert.serial, &cert.profile) {
                Ok(issued) => issued,
                Err(CaError::Rejected(reason)) => {
                    warn!(serial = %cert.serial, reason, "renewal rejected, skipped");
                    continue;
                }
                Err(e @ CaError::Unavailable(_)) => return Err(Error::Ca(e.to_string())),
            };

            let key_type = key_types
                .iter()
                .find(|kt| kt.name == cert.key_type)
                .cloned()
                .ok_or_else(|| {
                    Error::Config(format!(
                        "certificate key type {} missing from token type {}",
                        cert.key_type, ctx.token_type
                    ))
                })?;

            // Encryption credentials move to a fresh slot so the old
            // certificate stays available for decrypting old data;
            // everything else replaces in place.
            let suffix = match key_type.purpose {
                KeyPurpose::Encryption => store.next_free_suffix(class::CERTIFICATE)?,
                KeyPurpose::Signature => cert.suffix,
            };

            let (pair, public) = self.provider.generate_keypair(key_type.purpose)?;
            let kek = self.kek_handle()?;
            let wrapped = self.provider.wrap_private_key(kek, pair)?;
            if let Err(e) = card.import_wrapped_key(slot as u8, &wrapped) {
                self.provider.destroy(pair);
                return Err(e.into());
            }
            let key_id = self.provider.key_id(pair)?;
            self.provider.destroy(pair);

            add_credential_objects(
                store,
                suffix,
                &format!("{} {}", ctx.userid, key_type.name),
                &issued.der,
                &key_id,
                &public,
            )?;

            ctx.credentials.push(IssuedCredential {
                serial: issued.serial.clone(),
                key_type: key_type.name.clone(),
                origin_cuid: ctx.cuid_str.clone(),
                suffix,
            });
            ctx.cert_records.push(CertRecord {
                serial: issued.serial,
                origin_cuid: ctx.cuid_str.clone(),
                token_cuid: ctx.cuid_str.clone(),
                key_type: key_type.name,
                profile: cert.profile.clone(),
                status: CertStatus::Active,
                suffix,
                not_before: issued.not_before,
                not_after: issued.not_after,
                der: issued.der,
            });
        }
        Ok(())
    }

    /// Recovery provisioning: fresh issuance per the scheme, plus
    /// recovery of the last archived encryption key where called for.
    fn recover_all<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &mut ObjectStore,
        ctx: &mut EnrollmentContext,
        scheme: RecoveryScheme,
        source_cuid: &str,
    ) -> Result<()> {
        let key_types = self.config.key_types(&ctx.token_type)?.to_vec();

        let mut slot = 0u8;
        for key_type in &key_types {
            let recover_instead = scheme == RecoveryScheme::RecoverLast
                && key_type.purpose == KeyPurpose::Encryption;
            if recover_instead {
                self.recover_one(card, store, ctx, key_type, source_cuid, slot)?;
            } else {
                self.issue_one(card, store, ctx, key_type, slot)?;
            }
            slot += 1;
        }

        // The combined scheme also brings the lost key back, in its own
        // slot, on top of the fresh set: one extra credential for the
        // encryption key type.
        if scheme == RecoveryScheme::GenerateNewKeyAndRecoverLast {
            if let Some(enc_type) = key_types
                .iter()
                .find(|kt| kt.purpose == KeyPurpose::Encryption)
            {
                self.recover_one(card, store, ctx, enc_type, source_cuid, slot)?;
            }
        }
        Ok(())
    }

    /// Recover the most recent archived encryption credential of the
    /// source token onto the current one.
    fn recover_one<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &mut ObjectStore,
        ctx: &mut EnrollmentContext,
        key_type: &KeyTypeConfig,
        source_cuid: &str,
        slot: u8,
    ) -> Result<()> {
        let mut source_certs = self.directory.find_certificates(&CertFilter {
            token_cuid: Some(source_cuid.to_string()),
            key_type: Some(key_type.name.clone()),
            status: None,
        })?;
        source_certs.sort_by(|a, b| b.not_before.cmp(&a.not_before));
        let last = source_certs.first().ok_or_else(|| {
            Error::Directory(format!(
                "no {} certificate to recover from token {source_cuid}",
                key_type.name
            ))
        })?;

        let recovered = self
            .ca
            .recover_key(&last.serial)
            .map_err(|e| Error::Ca(e.to_string()))?;

        let kek = self.kek_handle()?;
        let (pair, public) = self
            .provider
            .import_wrapped_keypair(kek, &recovered.wrapped_private_key)?;

        let origin = source_cuid.to_string();
        let result = self.place_credential(
            card,
            store,
            ctx,
            key_type,
            pair,
            &public,
            recovered.cert,
            &origin,
            slot,
        );
        self.provider.destroy(pair);
        result
    }

    /// Serialize and write the object directory, aborting before the
    /// card write if it cannot fit. An overflow optionally formats the
    /// token so it is not left half-provisioned.
    fn write_store<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &ObjectStore,
    ) -> Result<()> {
        let buf = store.serialize(true)?;
        let free = card.free_memory()? as usize;

        if buf.len() > free {
            warn!(size = buf.len(), free, "object directory exceeds token memory");
            if self.config.force_format_on_overflow {
                self.format_token(card, store)?;
            }
            return Err(Error::ObjectTooLarge {
                size: buf.len(),
                free,
            });
        }

        card.create_object(&DIRECTORY_OBJECT_ID, buf.len() as u32)?;
        card.write_object(&DIRECTORY_OBJECT_ID, &buf)?;
        Ok(())
    }

    /// Wipe the object directory and move the token back to operational
    /// so a later enrollment finds a clean card.
    fn format_token<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
        store: &ObjectStore,
    ) -> Result<()> {
        info!("force-formatting token");
        let version = ObjectStore::generate_object_version(|| rand::rng().random::<u8>());
        let empty = ObjectStore::new(*store.cuid(), store.token_name(), version);
        let buf = empty.serialize(true)?;
        card.create_object(&DIRECTORY_OBJECT_ID, buf.len() as u32)?;
        card.write_object(&DIRECTORY_OBJECT_ID, &buf)?;
        card.set_lifecycle(lifecycle::OPERATIONAL)?;
        Ok(())
    }

    /// Read the existing object directory, if the token carries one.
    fn read_existing_store<T: CardTransport>(
        &mut self,
        card: &mut TokenCard<T>,
    ) -> Option<ObjectStore> {
        let header = card.read_object(&DIRECTORY_OBJECT_ID, 0, 20).ok()?;
        if header.len() < 20 {
            return None;
        }
        let region_size = u16::from_be_bytes([header[16], header[17]]) as usize;
        let offset = u16::from_be_bytes([header[18], header[19]]) as usize;
        let total = offset + region_size;

        let rest = card.read_object(&DIRECTORY_OBJECT_ID, 20, total - 20).ok()?;
        let mut buf = header;
        buf.extend_from_slice(&rest);

        match ObjectStore::parse(&buf) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "existing object directory unreadable, starting fresh");
                None
            }
        }
    }
}

/// Generate a numeric PIN inside the configured length range
fn generate_pin(min_length: usize, max_length: usize) -> Zeroizing<String> {
    let mut rng = rand::rng();
    let length = rng.random_range(min_length..=max_length);
    let mut pin = Zeroizing::new(String::with_capacity(length));
    for _ in 0..length {
        pin.push(char::from(b'0' + rng.random_range(0..10u8)));
    }
    pin
}

/// Challenge bound to the card's diversification data: the hash covers
/// both the card identity material and fresh randomness.
fn make_challenge(diversification: &[u8; 10], nonce: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(diversification);
    hasher.update(nonce);
    hasher.finalize().to_vec()
}

/// Add the three object specs one credential occupies
fn add_credential_objects(
    store: &mut ObjectStore,
    suffix: u8,
    label: &str,
    der: &[u8],
    key_id: &[u8],
    public: &[u8],
) -> Result<()> {
    store.add_object_spec(ObjectSpec::new(class::CERTIFICATE, suffix, der.to_vec()))?;

    let mut attrs = Vec::new();
    put_attribute(&mut attrs, attr::LABEL, label.as_bytes());
    put_attribute(&mut attrs, attr::KEY_ID, key_id);
    put_attribute(&mut attrs, attr::FIXED, &fixed_attributes(suffix).to_be_bytes());
    store.add_object_spec(ObjectSpec::new(class::CERT_ATTRIBUTES, suffix, attrs))?;

    let mut key_attrs = Vec::new();
    put_attribute(&mut key_attrs, attr::KEY_ID, key_id);
    put_attribute(&mut key_attrs, attr::VALUE, public);
    store.add_object_spec(ObjectSpec::new(class::KEY_ATTRIBUTES, suffix, key_attrs))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_length_range_is_honored() {
        for _ in 0..50 {
            let pin = generate_pin(6, 10);
            assert!((6..=10).contains(&pin.len()));
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn challenge_binds_diversification_data() {
        let div_a = [1u8; 10];
        let div_b = [2u8; 10];
        let nonce = [9u8; 16];

        assert_eq!(make_challenge(&div_a, &nonce), make_challenge(&div_a, &nonce));
        assert_ne!(make_challenge(&div_a, &nonce), make_challenge(&div_b, &nonce));
    }
}
