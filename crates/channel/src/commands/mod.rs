//! Command builders and response parsers for the card manager and token
//! applet instruction sets
//!
//! Each module pairs a builder returning a plain [`tokenkit_apdu::Command`]
//! with a parser for the response payload where the command returns one.

pub mod applet_load;
pub mod external_authenticate;
pub mod get_data;
pub mod import_key;
pub mod initialize_update;
pub mod issuer_info;
pub mod lifecycle;
pub mod objects;
pub mod pin;
pub mod put_key;
pub mod select;
pub mod status;
