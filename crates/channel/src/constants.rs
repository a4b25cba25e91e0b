//! Constants for the card-manager and token-applet protocols
//!
//! Instruction codes follow GlobalPlatform where the operation is a
//! GlobalPlatform one (secure channel, key loading, lifecycle) and the
//! token applet's native set for object and PIN management.

/// Command classes
pub mod cla {
    /// ISO7816 command class
    pub const ISO7816: u8 = 0x00;
    /// Card-manager command class
    pub const GP: u8 = 0x80;
    /// Secure messaging class (MAC present)
    pub const MAC: u8 = 0x84;
    /// Token applet command class
    pub const APPLET: u8 = 0xB0;
}

/// Instruction codes
pub mod ins {
    /// SELECT applet
    pub const SELECT: u8 = 0xA4;
    /// GET DATA
    pub const GET_DATA: u8 = 0xCA;
    /// INITIALIZE UPDATE
    pub const INITIALIZE_UPDATE: u8 = 0x50;
    /// EXTERNAL AUTHENTICATE
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    /// PUT KEY
    pub const PUT_KEY: u8 = 0xD8;
    /// SET STATUS (lifecycle)
    pub const SET_STATUS: u8 = 0xF0;
    /// DELETE object or applet
    pub const DELETE: u8 = 0xE4;
    /// LOAD applet block
    pub const LOAD: u8 = 0xE8;
    /// INSTALL
    pub const INSTALL: u8 = 0xE6;

    /// Applet: create an object entry
    pub const CREATE_OBJECT: u8 = 0x5A;
    /// Applet: write a block into an object
    pub const WRITE_OBJECT: u8 = 0x54;
    /// Applet: read a block from an object
    pub const READ_OBJECT: u8 = 0x56;
    /// Applet: report version and free memory
    pub const GET_STATUS: u8 = 0x3C;
    /// Applet: create the token PIN
    pub const CREATE_PIN: u8 = 0x40;
    /// Applet: replace the token PIN
    pub const SET_PIN: u8 = 0x04;
    /// Applet: import a wrapped private key
    pub const IMPORT_KEY_ENC: u8 = 0x0A;
    /// Applet: set issuer information bytes
    pub const SET_ISSUER_INFO: u8 = 0xF4;
}

/// Parameter values for SELECT (P1)
pub mod select_p1 {
    /// Select by DF name
    pub const BY_NAME: u8 = 0x04;
}

/// Parameter values for LOAD (P1)
pub mod load_p1 {
    /// More blocks follow
    pub const MORE_BLOCKS: u8 = 0x00;
    /// Last block
    pub const LAST_BLOCK: u8 = 0x80;
}

/// Parameter values for INSTALL (P1)
pub mod install_p1 {
    /// Install for load
    pub const FOR_LOAD: u8 = 0x02;
    /// Install for install and make selectable
    pub const FOR_INSTALL_AND_MAKE_SELECTABLE: u8 = 0x0C;
}

/// GET DATA tags
pub mod tags {
    /// Card production life cycle data
    pub const CPLC: u16 = 0x9F7F;
    /// Key information template
    pub const KEY_INFO: u16 = 0x00E0;
}

/// Secure Channel Protocol versions
pub mod scp {
    /// SCP01
    pub const SCP01: u8 = 0x01;
    /// SCP02
    pub const SCP02: u8 = 0x02;
}

/// Card lifecycle states settable through SET STATUS
pub mod lifecycle {
    /// Card manager / applet operational
    pub const OPERATIONAL: u8 = 0x07;
    /// Token fully provisioned
    pub const PROVISIONED: u8 = 0x0F;
}

/// Host and card challenge length in bytes
pub const CHALLENGE_LENGTH: usize = 8;

/// Length of an INITIALIZE UPDATE response
pub const INIT_UPDATE_RESPONSE_LENGTH: usize = 28;

/// Length of the key diversification data block
pub const DIVERSIFICATION_DATA_LENGTH: usize = 10;

/// Card manager AID
pub const CARD_MANAGER_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00];
