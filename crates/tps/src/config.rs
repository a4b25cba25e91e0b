//! Per-session service configuration
//!
//! All configuration is explicit data passed into the session that uses
//! it; nothing here is process-global. A config is validated once up
//! front: a malformed value is a fatal configuration error, never
//! retried and never papered over with a default at the point of use.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provider::KeyPurpose;
use crate::{Error, Result};

/// Applet management settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppletConfig {
    /// Version the fleet should be running, e.g. "1.3"
    pub target_version: String,
    /// Whether to upgrade applets that report another version
    pub enable_update: bool,
    /// Package AID, hex encoded
    pub package_aid: String,
    /// Applet instance AID, hex encoded
    pub instance_aid: String,
    /// Load file for upgrades, hex encoded; empty when updates are off
    #[serde(default)]
    pub load_file: String,
}

/// Symmetric card key settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySetConfig {
    /// Key version enrollment requires on the card
    pub required_version: u8,
    /// Key index within the version
    pub key_index: u8,
    /// Whether to run a PutKey ceremony when the card is behind
    pub enable_update: bool,
    /// Provider nickname of the master key backing the required version
    pub master_key_name: String,
    /// Key version shipped on blank cards
    pub default_version: u8,
    /// Well-known developer key on blank cards, hex encoded
    pub default_key: String,
}

/// PIN reset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinConfig {
    /// Whether enrollment resets the PIN at all
    pub reset_enabled: bool,
    /// Create the PIN when the token has none yet
    pub create_if_missing: bool,
    /// Minimum generated PIN length
    pub min_length: usize,
    /// Maximum generated PIN length
    pub max_length: usize,
    /// PIN retry limit programmed into the card
    pub max_attempts: u8,
}

/// Enrollment policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Accept tokens with no directory record
    pub allow_unknown_token: bool,
    /// Allow renewal of active tokens
    pub renewal_enabled: bool,
    /// Allow full re-enrollment of active tokens
    pub reenroll_enabled: bool,
    /// Days before notAfter a certificate becomes renewable
    pub grace_before_days: u64,
    /// Days after notAfter a certificate stays renewable
    pub grace_after_days: u64,
    /// Recovery scheme name, resolved per enrollment
    pub recovery_scheme: String,
    /// Token type used when recovering onto a temporary token
    pub temporary_token_type: String,
}

/// One certificate slot a token type provisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyTypeConfig {
    /// Key type name ("signing", "encryption", ...)
    pub name: String,
    /// What the key pair is for
    pub purpose: KeyPurpose,
    /// CA profile the certificate is requested under
    pub profile: String,
}

/// Per-token-type provisioning plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTypeConfig {
    /// Certificate slots to provision, in order
    pub key_types: Vec<KeyTypeConfig>,
}

/// Complete service configuration for one enrollment session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Applet management
    pub applet: AppletConfig,
    /// Symmetric card keys
    pub keys: KeySetConfig,
    /// PIN handling
    pub pin: PinConfig,
    /// Enrollment policy
    pub policy: PolicyConfig,
    /// Token type table
    pub token_types: BTreeMap<String, TokenTypeConfig>,
    /// Token type used when no rule matches
    pub default_token_type: String,
    /// Issuer banner written to provisioned tokens
    pub issuer_info: String,
    /// Require user authentication before provisioning
    pub authentication_enabled: bool,
    /// Format the token instead of leaving it half-written when the
    /// object directory does not fit
    pub force_format_on_overflow: bool,
}

impl ServiceConfig {
    /// Validate the configuration. Every problem found here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.pin.min_length == 0 || self.pin.min_length > self.pin.max_length {
            return Err(Error::Config(format!(
                "pin length range {}..{} is invalid",
                self.pin.min_length, self.pin.max_length
            )));
        }
        if self.keys.master_key_name.is_empty() {
            return Err(Error::Config("master key name is empty".into()));
        }
        match hex::decode(&self.keys.default_key) {
            Ok(key) if key.len() == 16 => {}
            _ => {
                return Err(Error::Config("default key must be 16 hex-encoded bytes".into()));
            }
        }
        if !self.token_types.contains_key(&self.default_token_type) {
            return Err(Error::Config(format!(
                "default token type {} has no entry in the token type table",
                self.default_token_type
            )));
        }
        if self.applet.enable_update {
            hex::decode(&self.applet.package_aid)
                .map_err(|_| Error::Config("package AID is not valid hex".into()))?;
            if self.applet.load_file.is_empty() {
                return Err(Error::Config(
                    "applet updates enabled but no load file configured".into(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the token type for a card from its applet version.
    ///
    /// Falls back to the default type when no specific entry exists;
    /// the default is guaranteed present by [`Self::validate`].
    pub fn resolve_token_type(&self, requested: Option<&str>) -> Result<&str> {
        match requested {
            Some(name) => self
                .token_types
                .get_key_value(name)
                .map(|(stored, _)| stored.as_str())
                .ok_or_else(|| Error::Config(format!("unknown token type: {name}"))),
            None => Ok(&self.default_token_type),
        }
    }

    /// The provisioning plan for a token type
    pub fn key_types(&self, token_type: &str) -> Result<&[KeyTypeConfig]> {
        self.token_types
            .get(token_type)
            .map(|t| t.key_types.as_slice())
            .ok_or_else(|| Error::Config(format!("unknown token type: {token_type}")))
    }

    /// The blank-card developer key bytes
    pub fn default_card_key(&self) -> Result<[u8; 16]> {
        let bytes = hex::decode(&self.keys.default_key)
            .map_err(|_| Error::Config("default key is not valid hex".into()))?;
        bytes
            .try_into()
            .map_err(|_| Error::Config("default key must be 16 bytes".into()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> ServiceConfig {
        let mut token_types = BTreeMap::new();
        token_types.insert(
            "userKey".to_string(),
            TokenTypeConfig {
                key_types: vec![
                    KeyTypeConfig {
                        name: "signing".into(),
                        purpose: KeyPurpose::Signature,
                        profile: "tokenSigning".into(),
                    },
                    KeyTypeConfig {
                        name: "encryption".into(),
                        purpose: KeyPurpose::Encryption,
                        profile: "tokenEncryption".into(),
                    },
                ],
            },
        );
        token_types.insert(
            "temporaryKey".to_string(),
            TokenTypeConfig {
                key_types: vec![KeyTypeConfig {
                    name: "signing".into(),
                    purpose: KeyPurpose::Signature,
                    profile: "tokenSigning".into(),
                }],
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
                default_key: "404142434445464748494a4b4c4d4e4f".into(),
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
                temporary_token_type: "temporaryKey".into(),
            },
            token_types,
            default_token_type: "userKey".into(),
            issuer_info: "Example Corp Token Service".into(),
            authentication_enabled: false,
            force_format_on_overflow: true,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn bad_pin_range_is_fatal() {
        let mut config = test_config();
        config.pin.min_length = 12;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_default_token_type_is_fatal() {
        let mut config = test_config();
        config.default_token_type = "ghost".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn update_without_load_file_is_fatal() {
        let mut config = test_config();
        config.applet.enable_update = true;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_requested_type_rejected() {
        let config = test_config();
        assert!(config.resolve_token_type(Some("ghost")).is_err());
        assert_eq!(config.resolve_token_type(None).unwrap(), "userKey");
    }
}
