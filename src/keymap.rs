//! Scan code set 2 to character tables.

pub const KEY_MAP_SIZE: usize = 128;

/// The characters produced by one key, unshifted and shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapEntry {
    pub regular: Option<char>,
    pub shifted: Option<char>,
}

impl KeyMapEntry {
    pub const EMPTY: KeyMapEntry = KeyMapEntry {
        regular: None,
        shifted: None,
    };

    pub const fn new(regular: char, shifted: char) -> Self {
        KeyMapEntry {
            regular: Some(regular),
            shifted: Some(shifted),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regular.is_none() && self.shifted.is_none()
    }

    /// Letters are the only keys that caps lock applies to.
    pub fn is_alphabetic(&self) -> bool {
        self.regular.is_some_and(|c| c.is_ascii_alphabetic())
    }
}

/// A fixed table indexed by scan code.
#[derive(Debug)]
pub struct KeyMap {
    entries: [KeyMapEntry; KEY_MAP_SIZE],
}

impl KeyMap {
    /// Codes past the end of the table have no entry.
    pub fn get(&self, code: u8) -> Option<&KeyMapEntry> {
        self.entries
            .get(code as usize)
            .filter(|entry| !entry.is_empty())
    }

    /// Find the key that produces `c`, and whether shift is needed for it.
    pub fn find(&self, c: char) -> Option<(u8, bool)> {
        self.entries
            .iter()
            .enumerate()
            .find_map(|(code, entry)| {
                if entry.regular == Some(c) {
                    Some((code as u8, false))
                } else if entry.shifted == Some(c) {
                    Some((code as u8, true))
                } else {
                    None
                }
            })
    }
}

macro_rules! def_key_map {
    ($name:ident { $($code:literal => $char:literal $( $char_shift:literal )?;)* }) => {
        pub static $name: KeyMap = {
            let mut entries = [KeyMapEntry::EMPTY; KEY_MAP_SIZE];
            $(
                entries[$code] = KeyMapEntry::new($char, def_key_map!(@shift $char $($char_shift)?));
            )*
            KeyMap { entries }
        };
    };
    (@shift $char:literal) => { $char };
    (@shift $char:literal $char_shift:literal) => { $char_shift };
}

def_key_map!(US_LAYOUT {
0x0e => '`' '~';
0x16 => '1' '!';
0x1e => '2' '@';
0x26 => '3' '#';
0x25 => '4' '$';
0x2e => '5' '%';
0x36 => '6' '^';
0x3d => '7' '&';
0x3e => '8' '*';
0x46 => '9' '(';
0x45 => '0' ')';
0x4e => '-' '_';
0x55 => '=' '+';

0x15 => 'q' 'Q';
0x1d => 'w' 'W';
0x24 => 'e' 'E';
0x2d => 'r' 'R';
0x2c => 't' 'T';
0x35 => 'y' 'Y';
0x3c => 'u' 'U';
0x43 => 'i' 'I';
0x44 => 'o' 'O';
0x4d => 'p' 'P';
0x54 => '[' '{';
0x5b => ']' '}';
0x5d => '\\' '|';

0x1c => 'a' 'A';
0x1b => 's' 'S';
0x23 => 'd' 'D';
0x2b => 'f' 'F';
0x34 => 'g' 'G';
0x33 => 'h' 'H';
0x3b => 'j' 'J';
0x42 => 'k' 'K';
0x4b => 'l' 'L';
0x4c => ';' ':';
0x52 => '\'' '"';

0x1a => 'z' 'Z';
0x22 => 'x' 'X';
0x21 => 'c' 'C';
0x2a => 'v' 'V';
0x32 => 'b' 'B';
0x31 => 'n' 'N';
0x3a => 'm' 'M';
0x41 => ',' '<';
0x49 => '.' '>';
0x4a => '/' '?';

0x29 => ' ';
// Whitespace and erase keys, so typed text can carry line breaks. Navigation,
// keypad and function keys stay unmapped.
0x0d => '\t';
0x5a => '\n';
0x66 => '\u{8}';
});

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x1c, 'a', 'A', true)]
    #[case(0x16, '1', '!', false)]
    #[case(0x5d, '\\', '|', false)]
    #[case(0x29, ' ', ' ', false)]
    #[case(0x5a, '\n', '\n', false)]
    fn test_entries(
        #[case] code: u8,
        #[case] regular: char,
        #[case] shifted: char,
        #[case] alphabetic: bool,
    ) {
        let entry = US_LAYOUT.get(code).unwrap();
        assert_eq!(entry.regular, Some(regular));
        assert_eq!(entry.shifted, Some(shifted));
        assert_eq!(entry.is_alphabetic(), alphabetic);
    }

    #[test]
    fn test_unmapped_codes() {
        // Shift, caps lock, the break prefix and anything past the table.
        for code in [0x00, 0x12, 0x58, 0x59, 0x7f, 0x80, 0xf0, 0xff] {
            assert_eq!(US_LAYOUT.get(code), None, "code {code:02X}");
        }
    }

    #[test]
    fn test_find() {
        assert_eq!(US_LAYOUT.find('a'), Some((0x1c, false)));
        assert_eq!(US_LAYOUT.find('A'), Some((0x1c, true)));
        assert_eq!(US_LAYOUT.find('?'), Some((0x4a, true)));
        assert_eq!(US_LAYOUT.find(' '), Some((0x29, false)));
        assert_eq!(US_LAYOUT.find('\u{e9}'), None);
    }

    #[test]
    fn test_all_letters_present() {
        for c in 'a'..='z' {
            let (code, shift) = US_LAYOUT.find(c).unwrap();
            assert!(!shift);
            let entry = US_LAYOUT.get(code).unwrap();
            assert_eq!(entry.shifted, Some(c.to_ascii_uppercase()));
        }
    }
}
