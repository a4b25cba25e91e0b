//! Transport layer for card communication
//!
//! Implementations carry one physical (or simulated) card connection.
//! APDU exchange is strictly request/response; every call blocks until
//! the card answers.

use std::fmt;

use bytes::Bytes;

use crate::Result;

/// A raw APDU pipe to a single card
pub trait CardTransport: fmt::Debug + Send {
    /// Send raw command bytes, return raw response bytes (including SW1 SW2)
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes>;

    /// Whether the card is still reachable
    fn is_connected(&self) -> bool;

    /// Reset the transport to its initial state
    fn reset(&mut self) -> Result<()>;
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}
