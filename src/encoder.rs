//! Command encoder
//!
//! Turns a [`Command`] into the bytes the host expects, validating field
//! writes against the current [`ScreenState`] before producing any output.

use std::time::Duration;

use log::trace;

use crate::command::{Command, KeyCode};
use crate::ebcdic::Charset;
use crate::error::EncodingError;
use crate::lib5250::codes::*;
use crate::screen::ScreenState;

/// Key to AID byte table, in 5250 keyboard order
pub static KEY_TABLE: &[(KeyCode, u8)] = &[
    (KeyCode::Enter, AID_ENTER),
    (KeyCode::F1, AID_F1),
    (KeyCode::F2, AID_F1 + 1),
    (KeyCode::F3, AID_F1 + 2),
    (KeyCode::F4, AID_F1 + 3),
    (KeyCode::F5, AID_F1 + 4),
    (KeyCode::F6, AID_F1 + 5),
    (KeyCode::F7, AID_F1 + 6),
    (KeyCode::F8, AID_F1 + 7),
    (KeyCode::F9, AID_F1 + 8),
    (KeyCode::F10, AID_F1 + 9),
    (KeyCode::F11, AID_F1 + 10),
    (KeyCode::F12, AID_F1 + 11),
    (KeyCode::F13, AID_F13),
    (KeyCode::F14, AID_F13 + 1),
    (KeyCode::F15, AID_F13 + 2),
    (KeyCode::F16, AID_F13 + 3),
    (KeyCode::F17, AID_F13 + 4),
    (KeyCode::F18, AID_F13 + 5),
    (KeyCode::F19, AID_F13 + 6),
    (KeyCode::F20, AID_F13 + 7),
    (KeyCode::F21, AID_F13 + 8),
    (KeyCode::F22, AID_F13 + 9),
    (KeyCode::F23, AID_F13 + 10),
    (KeyCode::F24, AID_F13 + 11),
    (KeyCode::Clear, AID_CLEAR),
    (KeyCode::Help, AID_HELP),
    (KeyCode::PageUp, AID_ROLL_DOWN),
    (KeyCode::PageDown, AID_ROLL_UP),
    (KeyCode::Print, AID_PRINT),
    (KeyCode::RecordBackspace, AID_RECORD_BACKSPACE),
];

/// AID byte for a key, if the table has one
pub fn aid_for(key: KeyCode) -> Option<u8> {
    KEY_TABLE
        .iter()
        .find(|(k, _)| *k == key)
        .map(|&(_, aid)| aid)
}

/// Output of encoding a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Bytes to send to the host
    Bytes(Vec<u8>),
    /// Nothing to send; wait locally for a matching screen
    LocalWait { pattern: String, timeout: Duration },
}

impl Encoded {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Encoded::Bytes(bytes) => Some(bytes),
            Encoded::LocalWait { .. } => None,
        }
    }
}

/// Stateless encoder bound to a wire charset
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandEncoder {
    charset: Charset,
}

impl CommandEncoder {
    pub fn new(charset: Charset) -> Self {
        Self { charset }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Encode one command against the current screen.
    ///
    /// A rejected command produces no bytes.
    pub fn encode(&self, command: Command, screen: &ScreenState) -> Result<Encoded, EncodingError> {
        trace!("encoding {}", command.describe());
        match command {
            Command::SendKeys { keys } => self.encode_text(&keys).map(Encoded::Bytes),
            Command::SetField { id, value } => {
                let field = screen.get_field(&id)?;
                field.check_write(&value)?;

                let (row, col) = wire_address(&field.id, field.row, field.col)?;
                let mut out = Vec::with_capacity(3 + value.len());
                out.extend_from_slice(&[SBA, row, col]);
                out.extend(self.encode_text(&value)?);
                Ok(Encoded::Bytes(out))
            }
            Command::PressKey { key } => aid_for(key)
                .map(|aid| Encoded::Bytes(vec![aid]))
                .ok_or_else(|| EncodingError::UnknownKey { key: key.to_string() }),
            Command::WaitForScreen { pattern, timeout_ms } => Ok(Encoded::LocalWait {
                pattern,
                timeout: Duration::from_millis(timeout_ms),
            }),
        }
    }

    /// Encode every command before returning any output.
    ///
    /// The first rejection aborts the whole batch.
    pub fn encode_batch(
        &self,
        commands: &[Command],
        screen: &ScreenState,
    ) -> Result<Vec<Encoded>, EncodingError> {
        commands
            .iter()
            .cloned()
            .map(|command| self.encode(command, screen))
            .collect()
    }

    fn encode_text(&self, text: &str) -> Result<Vec<u8>, EncodingError> {
        text.chars()
            .map(|ch| {
                self.charset.encode_char(ch).ok_or_else(|| EncodingError::Unrepresentable {
                    ch,
                    charset: self.charset.name().to_string(),
                })
            })
            .collect()
    }
}

/// 5250 buffer addresses are single bytes, 1-based
fn wire_address(id: &str, row: usize, col: usize) -> Result<(u8, u8), EncodingError> {
    match (u8::try_from(row), u8::try_from(col)) {
        (Ok(r), Ok(c)) => Ok((r, c)),
        _ => Err(EncodingError::AddressOutOfRange { id: id.to_string(), row, col }),
    }
}
