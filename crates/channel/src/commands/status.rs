//! Token applet GET STATUS: applet version and object memory

use tokenkit_apdu::Command;

use crate::{
    Error, Result,
    constants::{cla, ins},
};

/// Fixed length of the applet status payload
const STATUS_LENGTH: usize = 12;

/// Build the applet GET STATUS command
pub fn build() -> Command {
    Command::new(cla::APPLET, ins::GET_STATUS, 0x00, 0x00).with_le(STATUS_LENGTH as u8)
}

/// Applet status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppletStatus {
    /// Protocol version (major, minor)
    pub protocol_version: (u8, u8),
    /// Applet version (major, minor)
    pub applet_version: (u8, u8),
    /// Total object memory in bytes
    pub total_object_memory: u32,
    /// Free object memory in bytes
    pub free_object_memory: u32,
}

impl AppletStatus {
    /// Parse the fixed-layout status payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < STATUS_LENGTH {
            return Err(Error::InvalidLength {
                expected: STATUS_LENGTH,
                actual: payload.len(),
            });
        }

        Ok(Self {
            protocol_version: (payload[0], payload[1]),
            applet_version: (payload[2], payload[3]),
            total_object_memory: u32::from_be_bytes([
                payload[4], payload[5], payload[6], payload[7],
            ]),
            free_object_memory: u32::from_be_bytes([
                payload[8], payload[9], payload[10], payload[11],
            ]),
        })
    }

    /// Applet version as the "major.minor" form configuration uses
    pub fn applet_version_string(&self) -> String {
        format!("{}.{}", self.applet_version.0, self.applet_version.1)
    }
}
