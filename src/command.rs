//! High-level terminal commands
//!
//! Callers and the navigator build [`Command`] values; the encoder consumes each
//! one exactly once. Commands are serde-friendly so workflows can be scripted
//! in JSON.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EncodingError;

/// Keys that end an input operation and send an AID to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Enter,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    F13,
    F14,
    F15,
    F16,
    F17,
    F18,
    F19,
    F20,
    F21,
    F22,
    F23,
    F24,
    Clear,
    Help,
    /// Roll Down on a 5250 keyboard
    PageUp,
    /// Roll Up on a 5250 keyboard
    PageDown,
    Print,
    RecordBackspace,
}

impl KeyCode {
    pub const ALL: [KeyCode; 31] = [
        KeyCode::Enter,
        KeyCode::F1,
        KeyCode::F2,
        KeyCode::F3,
        KeyCode::F4,
        KeyCode::F5,
        KeyCode::F6,
        KeyCode::F7,
        KeyCode::F8,
        KeyCode::F9,
        KeyCode::F10,
        KeyCode::F11,
        KeyCode::F12,
        KeyCode::F13,
        KeyCode::F14,
        KeyCode::F15,
        KeyCode::F16,
        KeyCode::F17,
        KeyCode::F18,
        KeyCode::F19,
        KeyCode::F20,
        KeyCode::F21,
        KeyCode::F22,
        KeyCode::F23,
        KeyCode::F24,
        KeyCode::Clear,
        KeyCode::Help,
        KeyCode::PageUp,
        KeyCode::PageDown,
        KeyCode::Print,
        KeyCode::RecordBackspace,
    ];

    /// Function key number for F1..F24
    pub fn function_number(&self) -> Option<u8> {
        KeyCode::ALL[1..=24]
            .iter()
            .position(|k| k == self)
            .map(|i| i as u8 + 1)
    }

    pub fn from_function_number(n: u8) -> Option<KeyCode> {
        match n {
            1..=24 => Some(KeyCode::ALL[n as usize]),
            _ => None,
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl FromStr for KeyCode {
    type Err = EncodingError;

    /// Accepts `Enter`, `F1`..`F24`, `PF1`..`PF24` and the 5250 names
    /// `RollUp` / `RollDown`. Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let unknown = || EncodingError::UnknownKey { key: s.to_string() };

        let number = upper
            .strip_prefix("PF")
            .or_else(|| upper.strip_prefix('F'))
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
        if let Some(digits) = number {
            let n: u8 = digits.parse().map_err(|_| unknown())?;
            return KeyCode::from_function_number(n).ok_or_else(unknown);
        }

        match upper.as_str() {
            "ENTER" => Ok(KeyCode::Enter),
            "CLEAR" => Ok(KeyCode::Clear),
            "HELP" => Ok(KeyCode::Help),
            "PAGEUP" | "ROLLDOWN" => Ok(KeyCode::PageUp),
            "PAGEDOWN" | "ROLLUP" => Ok(KeyCode::PageDown),
            "PRINT" => Ok(KeyCode::Print),
            "RECORDBACKSPACE" => Ok(KeyCode::RecordBackspace),
            _ => Err(unknown()),
        }
    }
}

/// A typed, high-level terminal command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Literal keystrokes at the current cursor position
    SendKeys { keys: String },
    /// Write a value into a named field
    SetField { id: String, value: String },
    /// Press an AID-generating key
    PressKey { key: KeyCode },
    /// Local synchronization: wait for a screen containing `pattern`
    WaitForScreen { pattern: String, timeout_ms: u64 },
}

impl Command {
    pub fn send_keys(keys: impl Into<String>) -> Self {
        Command::SendKeys { keys: keys.into() }
    }

    pub fn set_field(id: impl Into<String>, value: impl Into<String>) -> Self {
        Command::SetField { id: id.into(), value: value.into() }
    }

    pub fn press(key: KeyCode) -> Self {
        Command::PressKey { key }
    }

    pub fn wait_for(pattern: impl Into<String>, timeout: Duration) -> Self {
        Command::WaitForScreen {
            pattern: pattern.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Commands after which the host answers with a new screen
    pub fn expects_response(&self) -> bool {
        matches!(self, Command::PressKey { .. })
    }

    /// Short label for logs and audit records
    pub fn describe(&self) -> String {
        match self {
            Command::SendKeys { keys } => format!("send_keys({} chars)", keys.chars().count()),
            Command::SetField { id, .. } => format!("set_field({id})"),
            Command::PressKey { key } => format!("press_key({key})"),
            Command::WaitForScreen { pattern, .. } => format!("wait_for_screen({pattern})"),
        }
    }
}
