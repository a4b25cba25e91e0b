//! Secure channel establishment and command wrapping
//!
//! One [`SecureChannel`] owns one card connection and moves through the
//! states `Unauthenticated → InitializeUpdateSent → ExternalAuthenticated
//! → Open → Closed`. A failed INITIALIZE UPDATE leaves the channel
//! unauthenticated (the caller may retry at a different key version); a
//! cryptogram or MAC failure during authentication closes the channel for
//! good. Once open, every command is MAC-wrapped before transmission.

use std::fmt;

use bytes::{BufMut, BytesMut};
use cipher::{Iv, Key};
use rand::RngCore;
use tokenkit_apdu::{CardTransport, Command, Response};
use tracing::{debug, trace, warn};

use crate::{
    Error, Result,
    commands::{external_authenticate, initialize_update},
    crypto::{HostChallenge, Scp02, encrypt_icv, mac_full_3des},
    session::{KeySet, Keys, Session},
};

/// Channel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No handshake attempted yet
    Unauthenticated,
    /// INITIALIZE UPDATE accepted, card cryptogram verified
    InitializeUpdateSent,
    /// EXTERNAL AUTHENTICATE transmitted, awaiting verdict
    ExternalAuthenticated,
    /// Mutual authentication complete, commands flow wrapped
    Open,
    /// Channel shut down; no further use permitted
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InitializeUpdateSent => "initialize-update-sent",
            Self::ExternalAuthenticated => "external-authenticated",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Command MAC wrapper with ICV chaining
#[derive(Clone)]
struct MacWrapper {
    mac_key: Key<Scp02>,
    icv: Iv<Scp02>,
}

impl MacWrapper {
    fn new(mac_key: Key<Scp02>) -> Self {
        Self {
            mac_key,
            icv: Iv::<Scp02>::default(),
        }
    }

    /// Append a MAC to the command, setting the secure-messaging class
    /// bit and chaining the MAC into the next command's ICV.
    fn wrap(&mut self, command: &Command) -> Command {
        let data_len = command.data().map_or(0, |d| d.len());
        let cla = command.class() | 0x04;

        let mut mac_input = BytesMut::with_capacity(5 + data_len);
        mac_input.put_u8(cla);
        mac_input.put_u8(command.instruction());
        mac_input.put_u8(command.p1());
        mac_input.put_u8(command.p2());
        mac_input.put_u8((data_len + 8) as u8);
        if let Some(data) = command.data() {
            mac_input.put_slice(data);
        }

        // First command MACs over the zero ICV, later ones over the
        // encrypted previous MAC.
        let icv = if self.icv == Iv::<Scp02>::default() {
            self.icv
        } else {
            encrypt_icv(&self.mac_key, &self.icv)
        };

        let mac = mac_full_3des(&self.mac_key, &icv, &mac_input);
        self.icv.copy_from_slice(&mac);

        let mut data = BytesMut::with_capacity(data_len + 8);
        if let Some(body) = command.data() {
            data.put_slice(body);
        }
        data.put_slice(&mac);

        let mut wrapped = command.clone().with_class(cla).with_data(data.freeze());
        if let Some(le) = command.expected_length() {
            wrapped = wrapped.with_le(le);
        }
        wrapped
    }
}

/// An authenticated command channel to one card
pub struct SecureChannel<T: CardTransport> {
    transport: T,
    state: ChannelState,
    session: Option<Session>,
    wrapper: Option<MacWrapper>,
}

impl<T: CardTransport> fmt::Debug for SecureChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("state", &self.state)
            .finish()
    }
}

impl<T: CardTransport> SecureChannel<T> {
    /// Wrap a transport in an unauthenticated channel
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            state: ChannelState::Unauthenticated,
            session: None,
            wrapper: None,
        }
    }

    /// Current channel state
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// The session, once INITIALIZE UPDATE has succeeded
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The key set the card reported during the handshake
    pub fn key_set(&self) -> Option<KeySet> {
        self.session.as_ref().map(Session::key_set)
    }

    /// Direct access to the transport for commands that must travel
    /// outside the channel (selection, pre-auth data reads).
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Tear the channel apart, returning the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Transmit a command without channel protection.
    ///
    /// Permitted in every state except `Closed`; used for applet
    /// selection and public data reads before authentication.
    pub fn transmit_clear(&mut self, command: &Command) -> Result<Response> {
        if self.state == ChannelState::Closed {
            return Err(Error::ChannelClosed);
        }

        trace!(command = %hex::encode(command.to_bytes()), "transmit (clear)");
        let raw = self.transport.transmit_raw(&command.to_bytes())?;
        Ok(Response::from_bytes(&raw)?)
    }

    /// Send INITIALIZE UPDATE at the given key version and index.
    ///
    /// On success the card's cryptogram has been verified and the
    /// reported key set is returned: this is the only point where a key
    /// version mismatch is discoverable, so callers deciding on a PutKey
    /// ceremony must inspect the returned version. A status-word failure
    /// leaves the channel unauthenticated and retryable at another
    /// version; a cryptogram mismatch closes it.
    pub fn initialize_update(
        &mut self,
        card_keys: &Keys,
        key_version: u8,
        key_index: u8,
    ) -> Result<KeySet> {
        if self.state != ChannelState::Unauthenticated {
            return Err(Error::InvalidState {
                operation: "INITIALIZE UPDATE",
                state: self.state,
            });
        }

        let mut host_challenge = HostChallenge::default();
        rand::rng().fill_bytes(&mut host_challenge);

        let cmd = initialize_update::build(key_version, key_index, &host_challenge);
        let payload = self.transmit_clear(&cmd)?.into_payload()?;

        let parsed = initialize_update::InitUpdateResponse::parse(&payload)?;
        debug!(
            requested = key_version,
            reported = parsed.key_version,
            "INITIALIZE UPDATE accepted"
        );

        let session = Session::from_init_response(card_keys, &parsed, host_challenge, key_index)
            .inspect_err(|_| {
                warn!("card cryptogram verification failed, channel is dead");
                self.state = ChannelState::Closed;
            })?;

        let key_set = session.key_set();
        self.session = Some(session);
        self.state = ChannelState::InitializeUpdateSent;
        Ok(key_set)
    }

    /// Send EXTERNAL AUTHENTICATE, completing mutual authentication.
    ///
    /// Failure here is fatal for the session: the channel closes and a
    /// fresh handshake on a new channel is required.
    pub fn external_authenticate(&mut self) -> Result<()> {
        if self.state != ChannelState::InitializeUpdateSent {
            return Err(Error::InvalidState {
                operation: "EXTERNAL AUTHENTICATE",
                state: self.state,
            });
        }

        let session = self
            .session
            .as_ref()
            .ok_or(Error::AuthenticationFailed("no session material"))?;

        let mut wrapper = MacWrapper::new(*session.keys().mac());
        let cmd = wrapper.wrap(&external_authenticate::build(&session.host_cryptogram()));

        self.state = ChannelState::ExternalAuthenticated;

        let raw = self.transport.transmit_raw(&cmd.to_bytes())?;
        let response = Response::from_bytes(&raw)?;

        if !response.is_success() {
            warn!(status = %response.status(), "EXTERNAL AUTHENTICATE refused");
            self.state = ChannelState::Closed;
            self.session = None;
            return Err(Error::AuthenticationFailed("EXTERNAL AUTHENTICATE refused"));
        }

        self.wrapper = Some(wrapper);
        self.state = ChannelState::Open;
        debug!("secure channel open");
        Ok(())
    }

    /// Full handshake: INITIALIZE UPDATE then EXTERNAL AUTHENTICATE
    pub fn open(&mut self, card_keys: &Keys, key_version: u8, key_index: u8) -> Result<KeySet> {
        let key_set = self.initialize_update(card_keys, key_version, key_index)?;
        self.external_authenticate()?;
        Ok(key_set)
    }

    /// Transmit a command through the open channel, MAC-wrapped
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        if self.state != ChannelState::Open {
            return Err(Error::InvalidState {
                operation: "secure transmit",
                state: self.state,
            });
        }

        let wrapper = self
            .wrapper
            .as_mut()
            .ok_or(Error::AuthenticationFailed("channel open without wrapper"))?;
        let wrapped = wrapper.wrap(command);

        trace!(command = %hex::encode(wrapped.to_bytes()), "transmit (wrapped)");
        let raw = self.transport.transmit_raw(&wrapped.to_bytes())?;
        Ok(Response::from_bytes(&raw)?)
    }

    /// Start a new session on the same connection.
    ///
    /// Only valid after a close; key replacement ceremonies close the
    /// session that carried the PutKey and reopen a fresh one at the new
    /// version.
    pub fn reset_session(&mut self) -> Result<()> {
        if self.state != ChannelState::Closed {
            return Err(Error::InvalidState {
                operation: "session reset",
                state: self.state,
            });
        }
        self.session = None;
        self.wrapper = None;
        self.state = ChannelState::Unauthenticated;
        Ok(())
    }

    /// Close the channel.
    ///
    /// Must be called exactly once per channel; a second close is a
    /// caller bug and reported as such. Closing never undoes card writes
    /// that already committed.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(Error::ChannelClosed);
        }

        debug!(state = %self.state, "closing secure channel");
        self.session = None;
        self.wrapper = None;
        self.state = ChannelState::Closed;

        if !self.transport.is_connected() {
            return Err(Error::Apdu(tokenkit_apdu::Error::NotConnected));
        }
        Ok(())
    }
}
