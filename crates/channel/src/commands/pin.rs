//! Token PIN management commands

use tokenkit_apdu::Command;

use crate::constants::{cla, ins};

/// Build a CREATE PIN command for PIN slot `pin_number`
pub fn build_create(pin_number: u8, max_attempts: u8, pin: &str) -> Command {
    Command::new_with_data(
        cla::APPLET,
        ins::CREATE_PIN,
        pin_number,
        max_attempts,
        pin.as_bytes().to_vec(),
    )
}

/// Build a SET PIN command replacing the PIN in slot `pin_number`
pub fn build_set(pin_number: u8, pin: &str) -> Command {
    Command::new_with_data(
        cla::APPLET,
        ins::SET_PIN,
        pin_number,
        0x00,
        pin.as_bytes().to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pin_layout() {
        let cmd = build_create(0, 5, "1234");
        assert_eq!(cmd.instruction(), ins::CREATE_PIN);
        assert_eq!(cmd.p1(), 0);
        assert_eq!(cmd.p2(), 5);
        assert_eq!(cmd.data(), Some("1234".as_bytes()));
    }

    #[test]
    fn set_pin_layout() {
        let cmd = build_set(0, "654321");
        assert_eq!(cmd.instruction(), ins::SET_PIN);
        assert_eq!(cmd.data(), Some("654321".as_bytes()));
    }
}
