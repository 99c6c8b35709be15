//! Session transport abstraction
//!
//! A [`SessionTransport`] owns one half-duplex terminal connection: the caller
//! sends a request, then receives exactly the screen the host answers with.
//! [`TcpSessionTransport`] speaks TN5250 over TCP; [`FakeSessionTransport`] is
//! a scripted stand-in for tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::ebcdic::Charset;
use crate::error::BridgeResult;
use crate::screen::ScreenState;

pub mod fake;
pub mod tcp;

pub use fake::{ConnectOutcome, FakeSessionTransport, ReceiveOutcome};
pub use tcp::TcpSessionTransport;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

#[async_trait]
pub trait SessionTransport: Send {
    /// Disconnected -> Connecting -> Connected. On failure the transport is
    /// back in Disconnected and the error says why.
    async fn connect(&mut self) -> BridgeResult<()>;

    /// Idempotent
    async fn disconnect(&mut self);

    /// Send one request. Fails with `NotConnected` unless Connected.
    async fn send(&mut self, bytes: &[u8]) -> BridgeResult<()>;

    /// Next screen from the host, bounded by [`Self::receive_timeout`]
    async fn receive(&mut self) -> BridgeResult<ScreenState>;

    fn state(&self) -> TransportState;

    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    fn receive_timeout(&self) -> Duration;

    /// Charset for text the caller encodes
    fn charset(&self) -> Charset {
        Charset::default()
    }
}
