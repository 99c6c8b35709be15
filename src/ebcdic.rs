//! EBCDIC code page 037 and the charset abstraction used on the wire
//!
//! AS/400 hosts speak CP037 (EBCDIC US/Canada). Test hosts and some gateways
//! pass plain ASCII through, so the charset is a per-session setting.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const CP037_TO_UNICODE: [char; 256] = [
    '\x00', '\x01', '\x02', '\x03', '\u{009C}', '\t', '\u{0086}', '\x7F',
    '\u{0097}', '\u{008D}', '\u{008E}', '\x0B', '\x0C', '\r', '\x0E', '\x0F',
    '\x10', '\x11', '\x12', '\x13', '\u{009D}', '\u{0085}', '\x08', '\u{0087}',
    '\x18', '\x19', '\u{0092}', '\u{008F}', '\x1C', '\x1D', '\x1E', '\x1F',
    '\u{0080}', '\u{0081}', '\u{0082}', '\u{0083}', '\u{0084}', '\n', '\x17', '\x1B',
    '\u{0088}', '\u{0089}', '\u{008A}', '\u{008B}', '\u{008C}', '\x05', '\x06', '\x07',
    '\u{0090}', '\u{0091}', '\x16', '\u{0093}', '\u{0094}', '\u{0095}', '\u{0096}', '\x04',
    '\u{0098}', '\u{0099}', '\u{009A}', '\u{009B}', '\x14', '\x15', '\u{009E}', '\x1A',
    ' ', '\u{00A0}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E1}', '\u{00E3}', '\u{00E5}',
    '\u{00E7}', '\u{00F1}', '\u{00A2}', '.', '<', '(', '+', '|',
    '&', '\u{00E9}', '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00ED}', '\u{00EE}', '\u{00EF}',
    '\u{00EC}', '\u{00DF}', '!', '$', '*', ')', ';', '\u{00AC}',
    '-', '/', '\u{00C2}', '\u{00C4}', '\u{00C0}', '\u{00C1}', '\u{00C3}', '\u{00C5}',
    '\u{00C7}', '\u{00D1}', '\u{00A6}', ',', '%', '_', '>', '?',
    '\u{00F8}', '\u{00C9}', '\u{00CA}', '\u{00CB}', '\u{00C8}', '\u{00CD}', '\u{00CE}', '\u{00CF}',
    '\u{00CC}', '`', ':', '#', '@', '\'', '=', '"',
    '\u{00D8}', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', '\u{00AB}', '\u{00BB}', '\u{00F0}', '\u{00FD}', '\u{00FE}', '\u{00B1}',
    '\u{00B0}', 'j', 'k', 'l', 'm', 'n', 'o', 'p',
    'q', 'r', '\u{00AA}', '\u{00BA}', '\u{00E6}', '\u{00B8}', '\u{00C6}', '\u{00A4}',
    '\u{00B5}', '~', 's', 't', 'u', 'v', 'w', 'x',
    'y', 'z', '\u{00A1}', '\u{00BF}', '\u{00D0}', '\u{00DD}', '\u{00DE}', '\u{00AE}',
    '^', '\u{00A3}', '\u{00A5}', '\u{00B7}', '\u{00A9}', '\u{00A7}', '\u{00B6}', '\u{00BC}',
    '\u{00BD}', '\u{00BE}', '[', ']', '\u{00AF}', '\u{00A8}', '\u{00B4}', '\u{00D7}',
    '{', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', '\u{00AD}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00F3}', '\u{00F5}',
    '}', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', '\u{00B9}', '\u{00FB}', '\u{00FC}', '\u{00F9}', '\u{00FA}', '\u{00FF}',
    '\\', '\u{00F7}', 'S', 'T', 'U', 'V', 'W', 'X',
    'Y', 'Z', '\u{00B2}', '\u{00D4}', '\u{00D6}', '\u{00D2}', '\u{00D3}', '\u{00D5}',
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '\u{00B3}', '\u{00DB}', '\u{00DC}', '\u{00D9}', '\u{00DA}', '\u{009F}',
];

static UNICODE_TO_CP037: Lazy<HashMap<char, u8>> = Lazy::new(|| {
    CP037_TO_UNICODE
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

/// Decode one CP037 byte
pub fn ebcdic_to_char(byte: u8) -> char {
    CP037_TO_UNICODE[byte as usize]
}

/// Encode one character as CP037, if the code page has it
pub fn char_to_ebcdic(ch: char) -> Option<u8> {
    UNICODE_TO_CP037.get(&ch).copied()
}

/// Character set used for text bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    #[default]
    Ebcdic037,
    Ascii,
}

impl Charset {
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Ebcdic037 => "CP037",
            Charset::Ascii => "ASCII",
        }
    }

    pub fn encode_char(&self, ch: char) -> Option<u8> {
        match self {
            Charset::Ebcdic037 => char_to_ebcdic(ch),
            Charset::Ascii => ch.is_ascii().then_some(ch as u8),
        }
    }

    /// Decode a byte for display. Control codes render as a space.
    pub fn decode_display(&self, byte: u8) -> char {
        match self {
            Charset::Ebcdic037 if byte < 0x40 => ' ',
            Charset::Ebcdic037 => ebcdic_to_char(byte),
            Charset::Ascii if byte < 0x20 || byte >= 0x7F => ' ',
            Charset::Ascii => byte as char,
        }
    }

    /// Encoded form of a space in this charset
    pub fn space(&self) -> u8 {
        match self {
            Charset::Ebcdic037 => 0x40,
            Charset::Ascii => b' ',
        }
    }

    pub fn encode_str(&self, text: &str) -> Option<Vec<u8>> {
        text.chars().map(|ch| self.encode_char(ch)).collect()
    }

    pub fn decode_str(&self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| self.decode_display(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp037_letters_and_digits() {
        assert_eq!(ebcdic_to_char(0xC1), 'A');
        assert_eq!(ebcdic_to_char(0x81), 'a');
        assert_eq!(ebcdic_to_char(0xF0), '0');
        assert_eq!(char_to_ebcdic('Z'), Some(0xE9));
        assert_eq!(char_to_ebcdic('-'), Some(0x60));
    }

    #[test]
    fn test_unmapped_character() {
        assert_eq!(char_to_ebcdic('\u{4E2D}'), None);
        assert_eq!(Charset::Ascii.encode_char('\u{00E9}'), None);
    }

    #[test]
    fn test_encode_and_display() {
        let bytes = Charset::Ebcdic037.encode_str("AUTO-123").unwrap();
        assert_eq!(bytes, vec![0xC1, 0xE4, 0xE3, 0xD6, 0x60, 0xF1, 0xF2, 0xF3]);
        assert_eq!(Charset::Ebcdic037.decode_str(&bytes), "AUTO-123");
        assert_eq!(Charset::Ebcdic037.decode_str(&[0x00, 0xC1]), " A");
    }
}
