//! Core types for APDU (Application Protocol Data Unit) exchange
//!
//! This crate provides the foundational pieces shared by every layer that
//! talks to a token: building and serializing APDU commands, parsing
//! responses and status words according to ISO/IEC 7816-4, and the
//! [`CardTransport`] trait that the secure channel and provisioning layers
//! drive.
//!
//! The card protocol is inherently sequential: one command, one response,
//! in order. Everything here is synchronous by design.

#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod command;
pub mod response;
pub mod status;
pub mod transport;

mod error;

pub use bytes::{Bytes, BytesMut};
pub use command::Command;
pub use error::{Error, Result};
pub use response::Response;
pub use status::StatusWord;
pub use transport::CardTransport;

/// Prelude with the types nearly every caller needs
pub mod prelude {
    pub use crate::{Bytes, BytesMut, CardTransport, Command, Error, Response, Result, StatusWord};
}
