//! High-level card operations for provisioning flows
//!
//! [`TokenCard`] owns the secure channel to one card and exposes the
//! typed operations the enrollment and ceremony layers drive: applet
//! selection, CPLC reads, key-set replacement, object management, PIN
//! and lifecycle control. Commands sent before the channel opens travel
//! in the clear; everything after travels MAC-wrapped.

use tokenkit_apdu::{CardTransport, Command, Response};
use tracing::{debug, info, warn};

use crate::{
    ChannelState, Error, KeySet, Keys, Result, SecureChannel,
    commands::{
        applet_load, get_data,
        get_data::Cplc,
        import_key, issuer_info, lifecycle, objects,
        objects::ObjectId,
        pin, put_key, select,
        status::{self, AppletStatus},
    },
    constants::CARD_MANAGER_AID,
};

/// Identity data gathered from the card before provisioning starts
#[derive(Debug, Clone)]
pub struct AppletInfo {
    /// Card unique id derived from the CPLC
    pub cuid: [u8; 10],
    /// Manufacturer serial number
    pub msn: [u8; 4],
    /// Applet version and memory report
    pub status: AppletStatus,
}

/// One card, one channel, typed operations
#[derive(Debug)]
pub struct TokenCard<T: CardTransport> {
    channel: SecureChannel<T>,
    applet_aid: Vec<u8>,
}

impl<T: CardTransport> TokenCard<T> {
    /// Wrap a transport, targeting the token applet at `applet_aid`
    pub fn new(transport: T, applet_aid: Vec<u8>) -> Self {
        Self {
            channel: SecureChannel::new(transport),
            applet_aid,
        }
    }

    /// Current channel state
    pub const fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// The key set reported during the handshake, once one happened
    pub fn key_set(&self) -> Option<KeySet> {
        self.channel.key_set()
    }

    /// Key diversification data from the handshake
    pub fn diversification_data(&self) -> Option<[u8; 10]> {
        self.channel.session().map(|s| *s.diversification_data())
    }

    /// Route a command through the channel when it is open, in the
    /// clear otherwise.
    fn send(&mut self, command: &Command) -> Result<Response> {
        match self.channel.state() {
            ChannelState::Open => self.channel.transmit(command),
            _ => self.channel.transmit_clear(command),
        }
    }

    /// Send and require a success status
    fn send_ok(&mut self, command: &Command) -> Result<Response> {
        let response = self.send(command)?;
        if !response.is_success() {
            return Err(Error::Apdu(tokenkit_apdu::Error::Status(response.status())));
        }
        Ok(response)
    }

    /// Select the card manager
    pub fn select_card_manager(&mut self) -> Result<()> {
        self.send_ok(&select::build(CARD_MANAGER_AID)).map(drop)
    }

    /// Select the token applet
    pub fn select_applet(&mut self) -> Result<()> {
        let aid = self.applet_aid.clone();
        self.send_ok(&select::build(&aid)).map(drop)
    }

    /// Read the CPLC and the applet status, deriving CUID and MSN
    pub fn applet_info(&mut self) -> Result<AppletInfo> {
        self.select_card_manager()?;
        let payload = self.send(&get_data::build_cplc())?.into_payload()?;
        let cplc = Cplc::parse(&payload)?;

        self.select_applet()?;
        let status = self.applet_status()?;

        let info = AppletInfo {
            cuid: cplc.cuid(),
            msn: cplc.msn(),
            status,
        };
        debug!(cuid = %crate::format_cuid(&info.cuid), "read card identity");
        Ok(info)
    }

    /// Read the applet's version and memory report
    pub fn applet_status(&mut self) -> Result<AppletStatus> {
        let payload = self.send(&status::build())?.into_payload()?;
        Ok(AppletStatus::parse(&payload)?)
    }

    /// Free object memory the applet reports right now
    pub fn free_memory(&mut self) -> Result<u32> {
        Ok(self.applet_status()?.free_object_memory)
    }

    /// Open the secure channel at the given key set.
    ///
    /// The card manager must be selected first; the returned key set is
    /// what the card actually reported.
    pub fn open_channel(&mut self, keys: &Keys, key_version: u8, key_index: u8) -> Result<KeySet> {
        self.select_card_manager()?;
        self.channel.open(keys, key_version, key_index)
    }

    /// Replace the card's key set with `new_keys` under version
    /// `new_version`, wrapping components under the session DEK.
    pub fn put_key_set(&mut self, old_version: u8, new_version: u8, new_keys: &Keys) -> Result<()> {
        let session = self
            .channel
            .session()
            .ok_or(Error::InvalidState {
                operation: "PUT KEY",
                state: self.channel.state(),
            })?;

        let block = put_key::build_key_block(session.keys().dek(), new_version, new_keys)?;
        info!(old_version, new_version, "replacing card key set");
        self.send_ok(&put_key::build(old_version, block)).map(drop)
    }

    /// Create an object of `size` bytes on the card
    pub fn create_object(&mut self, id: &ObjectId, size: u32) -> Result<()> {
        self.send_ok(&objects::build_create(id, size)).map(drop)
    }

    /// Write `data` into an existing object, chunked
    pub fn write_object(&mut self, id: &ObjectId, data: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        for chunk in data.chunks(objects::MAX_CHUNK) {
            self.send_ok(&objects::build_write(id, offset as u32, chunk))?;
            offset += chunk.len();
        }
        Ok(())
    }

    /// Read `len` bytes from an object starting at `offset`, chunked
    pub fn read_object(&mut self, id: &ObjectId, offset: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        let mut remaining = len;

        while remaining > 0 {
            let chunk = remaining.min(objects::MAX_CHUNK) as u8;
            let payload = self
                .send(&objects::build_read(id, pos, chunk))?
                .into_payload()?;
            if payload.is_empty() {
                return Err(Error::InvalidResponse("empty object read"));
            }
            out.extend_from_slice(&payload);
            pos += payload.len() as u32;
            remaining = remaining.saturating_sub(payload.len());
        }

        Ok(out)
    }

    /// Set the applet lifecycle state
    pub fn set_lifecycle(&mut self, state: u8) -> Result<()> {
        let aid = self.applet_aid.clone();
        self.send_ok(&lifecycle::build(state, &aid)).map(drop)
    }

    /// Write the issuer information record
    pub fn set_issuer_info(&mut self, info: &[u8]) -> Result<()> {
        self.send_ok(&issuer_info::build(info)).map(drop)
    }

    /// Import a wrapped private key into `key_slot`
    pub fn import_wrapped_key(&mut self, key_slot: u8, wrapped: &[u8]) -> Result<()> {
        self.send_ok(&import_key::build(key_slot, wrapped)).map(drop)
    }

    /// Create the token PIN in slot `pin_number`
    pub fn create_pin(&mut self, pin_number: u8, max_attempts: u8, pin: &str) -> Result<()> {
        self.send_ok(&pin::build_create(pin_number, max_attempts, pin))
            .map(drop)
    }

    /// Replace the token PIN in slot `pin_number`
    pub fn set_pin(&mut self, pin_number: u8, pin: &str) -> Result<()> {
        self.send_ok(&pin::build_set(pin_number, pin)).map(drop)
    }

    /// Replace the token applet with a new load file.
    ///
    /// Deletes the old package (tolerating its absence), loads the new
    /// file block by block, installs it, then selects the fresh applet.
    /// On any failure the original applet is reselected so the card is
    /// left talking to whatever it still has.
    pub fn upgrade_applet(&mut self, package_aid: &[u8], load_file: &[u8]) -> Result<()> {
        info!(blocks = load_file.len().div_ceil(applet_load::LOAD_BLOCK_SIZE), "upgrading applet");

        match self.try_upgrade(package_aid, load_file) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "applet upgrade failed, reselecting original applet");
                let _ = self.select_applet();
                Err(e)
            }
        }
    }

    fn try_upgrade(&mut self, package_aid: &[u8], load_file: &[u8]) -> Result<()> {
        match self.send(&applet_load::build_delete(package_aid)) {
            Ok(response) if response.is_success() || response.status().is_not_found() => {}
            Ok(response) => {
                return Err(Error::Apdu(tokenkit_apdu::Error::Status(response.status())));
            }
            Err(e) => return Err(e),
        }

        self.send_ok(&applet_load::build_install_for_load(package_aid))?;

        let blocks: Vec<&[u8]> = load_file.chunks(applet_load::LOAD_BLOCK_SIZE).collect();
        let last = blocks.len().saturating_sub(1);
        for (i, block) in blocks.iter().enumerate() {
            self.send_ok(&applet_load::build_load_block(i as u8, block, i == last))?;
        }

        let applet_aid = self.applet_aid.clone();
        self.send_ok(&applet_load::build_install_for_install(package_aid, &applet_aid))?;

        self.select_applet()
    }

    /// Close the channel. Must be called exactly once per session.
    pub fn close(&mut self) -> Result<()> {
        self.channel.close()
    }

    /// Start a fresh session after a close (key replacement reopens at
    /// the new version)
    pub fn reset_session(&mut self) -> Result<()> {
        self.channel.reset_session()
    }

    /// Tear the card handle apart, returning the transport
    pub fn into_transport(self) -> T {
        self.channel.into_transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hex_literal::hex;

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        sent: Vec<Vec<u8>>,
        responses: Vec<Bytes>,
    }

    impl ScriptedTransport {
        fn push(&mut self, response: &[u8]) {
            self.responses.insert(0, Bytes::copy_from_slice(response));
        }
    }

    impl CardTransport for ScriptedTransport {
        fn transmit_raw(&mut self, command: &[u8]) -> tokenkit_apdu::Result<Bytes> {
            self.sent.push(command.to_vec());
            self.responses
                .pop()
                .ok_or(tokenkit_apdu::Error::Transmission("no scripted response"))
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn reset(&mut self) -> tokenkit_apdu::Result<()> {
            Ok(())
        }
    }

    const APPLET_AID: [u8; 6] = hex!("A00000000101");

    #[test]
    fn applet_info_derives_identity() {
        let mut transport = ScriptedTransport::default();
        transport.push(&hex!("9000")); // select card manager
        let mut cplc = hex!("4790516838479100410036121069370107222233334444555501020304").to_vec();
        cplc.extend_from_slice(&hex!("05060708090a0b0c0d0e0f10"));
        cplc.extend_from_slice(&hex!("9000"));
        transport.push(&cplc);
        transport.push(&hex!("9000")); // select applet
        transport.push(&hex!("0100 0103 00008000 00003a98 9000")); // applet status

        let mut card = TokenCard::new(transport, APPLET_AID.to_vec());
        let info = card.applet_info().unwrap();

        assert_eq!(info.status.applet_version, (1, 3));
        assert_eq!(info.cuid[..4], hex!("68384791"));
    }

    #[test]
    fn write_object_chunks_data() {
        let mut transport = ScriptedTransport::default();
        for _ in 0..3 {
            transport.push(&hex!("9000"));
        }

        let mut card = TokenCard::new(transport, APPLET_AID.to_vec());
        let data = vec![0xAB; objects::MAX_CHUNK * 2 + 10];
        card.write_object(b"z0\x00\x00", &data).unwrap();

        let sent = &card.channel.transport_mut().sent;
        assert_eq!(sent.len(), 3);
        // last chunk carries the 10-byte remainder
        assert_eq!(sent[2][8], 10);
    }

    #[test]
    fn upgrade_reselects_original_on_failure() {
        let mut transport = ScriptedTransport::default();
        transport.push(&hex!("9000")); // delete
        transport.push(&hex!("6985")); // install-for-load refused
        transport.push(&hex!("9000")); // reselect original applet

        let mut card = TokenCard::new(transport, APPLET_AID.to_vec());
        assert!(card.upgrade_applet(&hex!("A000000001"), &[0u8; 16]).is_err());

        let sent = &card.channel.transport_mut().sent;
        // last command is the SELECT restoring the original applet
        assert_eq!(sent.last().unwrap()[1], 0xA4);
    }
}
