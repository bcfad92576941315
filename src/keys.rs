//! Scan code to character translation with shift and caps lock tracking.

use std::fmt;

use tracing::trace;

use crate::command::Leds;
use crate::keymap::KeyMap;

/// Special scan codes handled before the key map is consulted.
pub mod scancodes {
    /// The next code is a key release.
    pub const BREAK_PREFIX: u8 = 0xF0;
    pub const LEFT_SHIFT: u8 = 0x12;
    pub const RIGHT_SHIFT: u8 = 0x59;
    pub const CAPS_LOCK: u8 = 0x58;
}

use scancodes::*;

/// Currently held shift keys and the caps lock toggle.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const LEFT_SHIFT: Modifiers = Modifiers(0x01);
    pub const RIGHT_SHIFT: Modifiers = Modifiers(0x02);
    pub const CAPS_LOCK: Modifiers = Modifiers(0x04);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Modifiers) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Modifiers) {
        self.0 &= !other.0;
    }

    pub fn toggle(&mut self, other: Modifiers) {
        self.0 ^= other.0;
    }

    pub fn is_shift(self) -> bool {
        self.contains(Modifiers::LEFT_SHIFT) || self.contains(Modifiers::RIGHT_SHIFT)
    }

    pub fn is_caps_lock(self) -> bool {
        self.contains(Modifiers::CAPS_LOCK)
    }
}

impl fmt::Debug for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modifiers({:02X}=", self.0)?;
        let mut first = true;
        for modifier in [
            ("LShift", self.contains(Modifiers::LEFT_SHIFT)),
            ("RShift", self.contains(Modifiers::RIGHT_SHIFT)),
            ("Caps", self.contains(Modifiers::CAPS_LOCK)),
        ] {
            if modifier.1 {
                if first {
                    first = false;
                } else {
                    write!(f, "+")?;
                }
                write!(f, "{}", modifier.0)?;
            }
        }
        write!(f, ")")
    }
}

/// What a decoded scan code asks of the rest of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// A printable character was typed.
    Char(char),
    /// The keyboard indicators should change to match the modifier state.
    Indicator { leds: Leds, on: bool },
}

fn shift_modifier(code: u8) -> Option<Modifiers> {
    match code {
        LEFT_SHIFT => Some(Modifiers::LEFT_SHIFT),
        RIGHT_SHIFT => Some(Modifiers::RIGHT_SHIFT),
        _ => None,
    }
}

pub struct KeyHandler {
    key_map: &'static KeyMap,
    modifiers: Modifiers,
    release_pending: bool,
}

impl KeyHandler {
    pub fn new(key_map: &'static KeyMap) -> Self {
        Self {
            key_map,
            modifiers: Modifiers::default(),
            release_pending: false,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn on_decoded(&mut self, code: u8, has_error: bool) -> Option<KeyEvent> {
        if has_error {
            self.release_pending = false;
            return None;
        }

        if code == BREAK_PREFIX {
            self.release_pending = true;
            return None;
        }

        if self.release_pending {
            self.release_pending = false;
            if let Some(modifier) = shift_modifier(code) {
                self.modifiers.remove(modifier);
                trace!("KBD: release {code:02X}, {:?}", self.modifiers);
            }
            return None;
        }

        if let Some(modifier) = shift_modifier(code) {
            self.modifiers.insert(modifier);
            trace!("KBD: press {code:02X}, {:?}", self.modifiers);
            return None;
        }

        if code == CAPS_LOCK {
            self.modifiers.toggle(Modifiers::CAPS_LOCK);
            trace!("KBD: caps lock, {:?}", self.modifiers);
            return Some(KeyEvent::Indicator {
                leds: Leds::CAPS_LOCK,
                on: self.modifiers.is_caps_lock(),
            });
        }

        let entry = self.key_map.get(code)?;
        let shifted = if entry.is_alphabetic() {
            self.modifiers.is_shift() ^ self.modifiers.is_caps_lock()
        } else {
            self.modifiers.is_shift()
        };
        let c = if shifted {
            entry.shifted?
        } else {
            entry.regular?
        };
        Some(KeyEvent::Char(c))
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use rstest::rstest;

    use super::*;
    use crate::keymap::US_LAYOUT;

    fn run(handler: &mut KeyHandler, codes: &[u8]) -> Vec<KeyEvent> {
        codes
            .iter()
            .filter_map(|&code| handler.on_decoded(code, false))
            .collect()
    }

    fn chars(events: &[KeyEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                KeyEvent::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    #[rstest]
    #[case::plain(&hex!("1c"), "a")]
    #[case::left_shift(&hex!("12 1c"), "A")]
    #[case::right_shift(&hex!("59 1c"), "A")]
    #[case::shift_released(&hex!("12 f0 12 1c"), "a")]
    #[case::digit_shifted(&hex!("12 16"), "!")]
    #[case::letter_release_ignored(&hex!("1c f0 1c 1c"), "aa")]
    #[case::unmapped(&hex!("76 80 ff"), "")]
    #[case::both_shifts_one_released(&hex!("12 59 f0 12 1c"), "A")]
    #[case::caps(&hex!("58 f0 58 1c 16"), "A1")]
    #[case::caps_and_shift(&hex!("58 12 1c 16"), "a!")]
    #[case::caps_twice(&hex!("58 58 1c"), "a")]
    fn test_sequences(#[case] codes: &[u8], #[case] expected: &str) {
        let mut handler = KeyHandler::new(&US_LAYOUT);
        assert_eq!(chars(&run(&mut handler, codes)), expected);
    }

    #[test]
    fn test_break_clears_shift_silently() {
        let mut handler = KeyHandler::new(&US_LAYOUT);
        assert!(run(&mut handler, &hex!("12")).is_empty());
        assert!(handler.modifiers().contains(Modifiers::LEFT_SHIFT));
        assert!(run(&mut handler, &hex!("f0 12")).is_empty());
        assert_eq!(handler.modifiers(), Modifiers::default());
    }

    #[test]
    fn test_caps_lock_requests_indicator() {
        let mut handler = KeyHandler::new(&US_LAYOUT);
        assert_eq!(
            handler.on_decoded(CAPS_LOCK, false),
            Some(KeyEvent::Indicator {
                leds: Leds::CAPS_LOCK,
                on: true
            })
        );
        assert!(handler.modifiers().is_caps_lock());
        // Releasing caps lock does nothing, pressing it again turns it off.
        assert!(run(&mut handler, &hex!("f0 58")).is_empty());
        assert_eq!(
            handler.on_decoded(CAPS_LOCK, false),
            Some(KeyEvent::Indicator {
                leds: Leds::CAPS_LOCK,
                on: false
            })
        );
    }

    #[test]
    fn test_frame_error_drops_pending_release() {
        let mut handler = KeyHandler::new(&US_LAYOUT);
        run(&mut handler, &hex!("12 f0"));
        // The release target arrives corrupted and is dropped, shift stays held.
        assert_eq!(handler.on_decoded(0x12, true), None);
        assert!(handler.modifiers().is_shift());
        // The next good code is a press, not a release.
        assert_eq!(handler.on_decoded(0x1c, false), Some(KeyEvent::Char('A')));
    }

    #[test]
    fn test_modifiers_debug() {
        let mut modifiers = Modifiers::LEFT_SHIFT;
        modifiers.insert(Modifiers::CAPS_LOCK);
        assert_eq!(format!("{modifiers:?}"), "Modifiers(05=LShift+Caps)");
    }
}
