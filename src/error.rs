//! Error taxonomy for the AS/400 bridge
//!
//! Every failure the bridge can report is a variant of [`BridgeError`]. Callers
//! discriminate on [`BridgeError::kind`] (an explicit tag) or match the enum
//! directly; nothing relies on runtime type identity.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a screen refuses a field write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldRejection {
    #[error("unknown field '{id}'")]
    UnknownField { id: String },
    #[error("field '{id}' is protected")]
    ProtectedField { id: String },
    #[error("value for field '{id}' is {actual} characters, field holds {max}")]
    ValueTooLong { id: String, actual: usize, max: usize },
}

/// Command encoding failures. Detected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("unknown field '{id}'")]
    UnknownField { id: String },
    #[error("field '{id}' is protected")]
    ProtectedField { id: String },
    #[error("value for field '{id}' is {actual} characters, field holds {max}")]
    ValueTooLong { id: String, actual: usize, max: usize },
    #[error("unknown key '{key}'")]
    UnknownKey { key: String },
    #[error("character '{ch}' cannot be represented in {charset}")]
    Unrepresentable { ch: char, charset: String },
    #[error("field '{id}' at ({row}, {col}) is outside the addressable range")]
    AddressOutOfRange { id: String, row: usize, col: usize },
}

impl From<FieldRejection> for EncodingError {
    fn from(rejection: FieldRejection) -> Self {
        match rejection {
            FieldRejection::UnknownField { id } => EncodingError::UnknownField { id },
            FieldRejection::ProtectedField { id } => EncodingError::ProtectedField { id },
            FieldRejection::ValueTooLong { id, actual, max } => {
                EncodingError::ValueTooLong { id, actual, max }
            }
        }
    }
}

/// Invariant violations while building a [`crate::screen::ScreenState`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreenError {
    #[error("screen dimensions {rows}x{cols} are invalid")]
    InvalidDimensions { rows: usize, cols: usize },
    #[error("cursor ({row}, {col}) outside {rows}x{cols} grid")]
    CursorOutOfBounds { row: usize, col: usize, rows: usize, cols: usize },
    #[error("field '{id}' at ({row}, {col}) length {length} does not fit the grid")]
    FieldOutOfBounds { id: String, row: usize, col: usize, length: usize },
    #[error("duplicate field identifier '{id}'")]
    DuplicateField { id: String },
    #[error("field '{id}' value exceeds its length {length}")]
    FieldOverflow { id: String, length: usize },
}

/// 5250 data stream and telnet framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("record too short: need at least {need} bytes, got {got}")]
    RecordTooShort { need: usize, got: usize },
    #[error("record length field ({declared}) does not match data ({actual})")]
    RecordLengthMismatch { declared: usize, actual: usize },
    #[error("record of {length} bytes exceeds the {max} byte limit")]
    RecordTooLong { length: usize, max: usize },
    #[error("unexpected record type 0x{0:04X}")]
    InvalidRecordType(u16),
    #[error("invalid 5250 command code: 0x{0:02X}")]
    InvalidCommandCode(u8),
    #[error("truncated order 0x{order:02X} at offset {offset}")]
    TruncatedOrder { order: u8, offset: usize },
    #[error("invalid buffer address: row {row}, col {col}")]
    InvalidAddress { row: u8, col: u8 },
    #[error("expected a field attribute at offset {offset}, found 0x{byte:02X}")]
    InvalidAttribute { byte: u8, offset: usize },
    #[error("decoded screen is inconsistent: {0}")]
    Screen(#[from] ScreenError),
    #[error("telnet negotiation incomplete: {0}")]
    NegotiationIncomplete(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    #[error("configuration file error '{path}': {error}")]
    FileError { path: String, error: String },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Explicit discriminant for [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ConnectionTimeout,
    ConnectionFailed,
    ConnectionLost,
    NotConnected,
    ReceiveTimeout,
    Authentication,
    ScreenNavigation,
    WaitTimeout,
    Encoding,
    DataValidation,
    Protocol,
    Screen,
    Config,
    Io,
}

/// Top-level error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Retry budget exhausted without a live session
    #[error("could not connect to {host} after {attempts} attempt(s) in {}ms", elapsed.as_millis())]
    ConnectionTimeout { host: String, attempts: u32, elapsed: Duration },

    /// A single connect attempt failed (refused, unreachable, negotiation)
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// The host dropped an established session
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("no screen received within {}ms", timeout.as_millis())]
    ReceiveTimeout { timeout: Duration },

    /// Host rejected the sign-on; never retried
    #[error("authentication rejected: {reason}")]
    Authentication { reason: String },

    #[error("expected screen '{expected}', host is on '{}'", actual.as_deref().unwrap_or("<unidentified>"))]
    ScreenNavigation { expected: String, actual: Option<String> },

    #[error("no screen matching '{pattern}' within {}ms", timeout.as_millis())]
    WaitTimeout { pattern: String, timeout: Duration },

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Business-level field failure, caught before encoding
    #[error("field '{field}' failed validation: {reason}")]
    DataValidation { field: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("screen error: {0}")]
    Screen(#[from] ScreenError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            BridgeError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            BridgeError::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            BridgeError::NotConnected => ErrorKind::NotConnected,
            BridgeError::ReceiveTimeout { .. } => ErrorKind::ReceiveTimeout,
            BridgeError::Authentication { .. } => ErrorKind::Authentication,
            BridgeError::ScreenNavigation { .. } => ErrorKind::ScreenNavigation,
            BridgeError::WaitTimeout { .. } => ErrorKind::WaitTimeout,
            BridgeError::Encoding(_) => ErrorKind::Encoding,
            BridgeError::DataValidation { .. } => ErrorKind::DataValidation,
            BridgeError::Protocol(_) => ErrorKind::Protocol,
            BridgeError::Screen(_) => ErrorKind::Screen,
            BridgeError::Config(_) => ErrorKind::Config,
            BridgeError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a caller may reasonably retry (possibly after reconnecting).
    ///
    /// Surface recoverable errors as "temporarily unavailable, retrying";
    /// everything else needs human intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectionTimeout
                | ErrorKind::ConnectionFailed
                | ErrorKind::ConnectionLost
                | ErrorKind::ReceiveTimeout
                | ErrorKind::ScreenNavigation
                | ErrorKind::WaitTimeout
        )
    }

    /// Stable error code for documentation lookup and user-facing messages.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ConnectionTimeout => "BRG-NET001",
            ErrorKind::ConnectionFailed => "BRG-NET002",
            ErrorKind::ConnectionLost => "BRG-NET003",
            ErrorKind::NotConnected => "BRG-NET004",
            ErrorKind::ReceiveTimeout => "BRG-NET005",
            ErrorKind::Authentication => "BRG-AUTH001",
            ErrorKind::ScreenNavigation => "BRG-NAV001",
            ErrorKind::WaitTimeout => "BRG-NAV002",
            ErrorKind::Encoding => "BRG-ENC001",
            ErrorKind::DataValidation => "BRG-VAL001",
            ErrorKind::Protocol => "BRG-PROTO001",
            ErrorKind::Screen => "BRG-SCR001",
            ErrorKind::Config => "BRG-CFG001",
            ErrorKind::Io => "BRG-IO001",
        }
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
