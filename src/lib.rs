//! as400-bridge: typed commands over an IBM i (AS/400) 5250 terminal session
//!
//! Callers connect through a [`ConnectionManager`], drive screens with a
//! [`ScreenNavigator`], and read field values off immutable [`ScreenState`]
//! snapshots. Row/column addressing stays inside the 5250 adapter; everything
//! above it works with field identifiers.

/// Audit tuples emitted after each high-level operation
pub mod audit;

/// Screen identification and field labels
pub mod catalog;

pub mod command;
pub mod config;

/// Connection management with retry and back-off
pub mod connection;

/// EBCDIC code page 37 translation
pub mod ebcdic;

pub mod encoder;
pub mod error;

/// LIB5250: 5250 data stream constants and record decoding
pub mod lib5250;

pub mod navigator;
pub mod screen;
pub mod telnet_negotiation;

/// Session transports (TN5250 over TCP, scripted fake)
pub mod transport;

pub mod validation;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, LogAuditSink, MemoryAuditSink};
pub use catalog::{FieldLabel, ScreenCatalog, ScreenDefinition, TextMatch};
pub use command::{Command, KeyCode};
pub use config::{BridgeConfig, Credentials, RetryPolicy, SessionConfig};
pub use connection::{ConnectionAttempt, ConnectionManager};
pub use ebcdic::Charset;
pub use encoder::{CommandEncoder, Encoded};
pub use error::{BridgeError, BridgeResult, EncodingError, ErrorKind, FieldRejection};
pub use navigator::ScreenNavigator;
pub use screen::{ScreenField, ScreenState};
pub use transport::{
    FakeSessionTransport, SessionTransport, TcpSessionTransport, TransportState,
};
pub use validation::{FieldRules, ValidationRules};
