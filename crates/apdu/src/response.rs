//! APDU response parsing

use bytes::Bytes;
use tracing::trace;

use crate::{Error, Result, StatusWord};

/// A parsed APDU response: payload plus trailing status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
    status: StatusWord,
}

impl Response {
    /// Create a response from an already-split payload and status
    pub const fn new(payload: Bytes, status: StatusWord) -> Self {
        Self { payload, status }
    }

    /// Parse raw response bytes (payload followed by SW1 SW2)
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::TruncatedResponse { actual: raw.len() });
        }

        let (payload, sw) = raw.split_at(raw.len() - 2);
        let status = StatusWord::new(sw[0], sw[1]);

        trace!(
            status = %status,
            payload_len = payload.len(),
            "parsed APDU response"
        );

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status,
        })
    }

    /// Response payload (empty when the card returned only a status)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check for 90 00
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Return the payload if the status is success, the status as an error otherwise
    pub fn into_payload(self) -> Result<Bytes> {
        if self.status.is_success() {
            Ok(self.payload)
        } else {
            Err(Error::Status(self.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parse_with_payload() {
        let resp = Response::from_bytes(&hex!("0102039000")).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.payload().as_ref(), hex!("010203"));
    }

    #[test]
    fn parse_status_only() {
        let resp = Response::from_bytes(&hex!("6A82")).unwrap();
        assert!(!resp.is_success());
        assert!(resp.payload().is_empty());
        assert!(matches!(
            resp.into_payload(),
            Err(Error::Status(sw)) if sw.to_u16() == 0x6A82
        ));
    }

    #[test]
    fn reject_truncated() {
        assert!(matches!(
            Response::from_bytes(&hex!("90")),
            Err(Error::TruncatedResponse { actual: 1 })
        ));
    }
}
