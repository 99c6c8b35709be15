//! TN5250 over TCP
//!
//! Connect runs telnet option negotiation, then waits for the first host
//! screen and checks it for sign-on rejection messages. Each `send` goes out
//! as one GDS record terminated by `IAC EOR`; each `receive` decodes the next
//! inbound record into a [`ScreenState`].

use std::collections::VecDeque;
use std::io::ErrorKind as IoErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use crate::catalog::ScreenCatalog;
use crate::config::SessionConfig;
use crate::ebcdic::Charset;
use crate::error::{BridgeError, BridgeResult, ProtocolError};
use crate::lib5250::codes::OPCODE_PUT_GET;
use crate::lib5250::datastream::{decode_record, wrap_record};
use crate::screen::ScreenState;
use crate::telnet_negotiation::{frame_record, Inbound, RecordFramer, TelnetNegotiator, TerminalProfile};
use crate::transport::{SessionTransport, TransportState};

/// Upper bound for a single socket read
const MAX_READ_SIZE: usize = 8192;

/// Time the connect handshake may take out of the session timeout.
///
/// Kept under the full timeout so a handshake that stalls reports its own
/// reason before the connection manager's per-attempt cutoff fires.
fn handshake_budget(limit: Duration) -> Duration {
    limit - limit / 10
}

#[derive(Debug)]
pub struct TcpSessionTransport {
    config: SessionConfig,
    catalog: Arc<ScreenCatalog>,
    state: TransportState,
    stream: Option<TcpStream>,
    negotiator: TelnetNegotiator,
    framer: RecordFramer,
    /// Complete records not yet handed out
    pending: VecDeque<Vec<u8>>,
    /// Screen read during connect, delivered by the first `receive`
    first_screen: Option<ScreenState>,
}

impl TcpSessionTransport {
    pub fn new(config: SessionConfig, catalog: Arc<ScreenCatalog>) -> Self {
        let negotiator = TelnetNegotiator::new(profile_for(&config));
        Self {
            config,
            catalog,
            state: TransportState::Disconnected,
            stream: None,
            negotiator,
            framer: RecordFramer::new(),
            pending: VecDeque::new(),
            first_screen: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn open(&mut self) -> BridgeResult<()> {
        let address = self.config.address();
        let budget = handshake_budget(self.config.timeout());
        let deadline = Instant::now() + budget;
        debug!("connecting to {}", address);
        let stream = match timeout_at(deadline, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(BridgeError::ConnectionFailed { reason: format!("{address}: {e}") })
            }
            Err(_) => {
                return Err(BridgeError::ConnectionFailed {
                    reason: format!("{address}: connect timed out after {}ms", budget.as_millis()),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {}", e);
        }

        self.stream = Some(stream);
        self.framer = RecordFramer::new();
        self.negotiator = TelnetNegotiator::new(profile_for(&self.config));
        self.pending.clear();
        self.first_screen = None;

        let initial = self.negotiator.generate_initial_negotiation();
        self.write_all(&initial).await?;

        let record = match timeout_at(deadline, self.next_record()).await {
            Ok(record) => record?,
            Err(_) => {
                return Err(BridgeError::ConnectionFailed {
                    reason: format!("no screen from {address} within {}ms", budget.as_millis()),
                })
            }
        };

        if !self.negotiator.is_negotiation_complete() {
            let incomplete = ProtocolError::NegotiationIncomplete(
                "host sent data before BINARY, EOR and SGA were agreed".to_string(),
            );
            return Err(BridgeError::ConnectionFailed { reason: incomplete.to_string() });
        }

        let screen = self.decode(&record)?;
        if let Some(marker) = self.auth_failure(&screen) {
            return Err(BridgeError::Authentication {
                reason: format!("host rejected sign-on ({marker})"),
            });
        }

        info!(
            "connected to {} as {}",
            address,
            self.config.device_name.as_deref().unwrap_or("<host-assigned device>")
        );
        self.first_screen = Some(screen);
        Ok(())
    }

    fn auth_failure(&self, screen: &ScreenState) -> Option<String> {
        self.config
            .auth_failure_markers
            .iter()
            .find(|marker| screen.matches(marker))
            .cloned()
    }

    fn decode(&self, record: &[u8]) -> BridgeResult<ScreenState> {
        let screen = decode_record(record, &self.catalog, self.config.charset)?;
        trace!(
            "decoded screen {:?} with {} fields",
            screen.screen_id(),
            screen.fields().len()
        );
        Ok(screen)
    }

    async fn next_record(&mut self) -> BridgeResult<Vec<u8>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(record);
            }
            self.read_some().await?;
        }
    }

    /// One socket read, with negotiation answered inline
    async fn read_some(&mut self) -> BridgeResult<()> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        let mut buffer = [0u8; MAX_READ_SIZE];
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Err(BridgeError::ConnectionLost { reason: "host closed the connection".to_string() });
        }
        self.absorb(&buffer[..n]).await
    }

    async fn absorb(&mut self, data: &[u8]) -> BridgeResult<()> {
        for unit in self.framer.push(data)? {
            match unit {
                Inbound::Record(record) => self.pending.push_back(record),
                Inbound::Negotiation(bytes) => {
                    let reply = self.negotiator.process_incoming_data(&bytes);
                    if !reply.is_empty() {
                        self.write_all(&reply).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop every screen that arrived before the request about to be sent
    async fn discard_stale(&mut self) -> BridgeResult<()> {
        let mut buffer = [0u8; MAX_READ_SIZE];
        loop {
            let Some(stream) = self.stream.as_ref() else {
                return Err(BridgeError::NotConnected);
            };
            match stream.try_read(&mut buffer) {
                Ok(0) => {
                    return Err(BridgeError::ConnectionLost {
                        reason: "host closed the connection".to_string(),
                    })
                }
                Ok(n) => self.absorb(&buffer[..n]).await?,
                Err(e) if e.kind() == IoErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        let stale = self.pending.len() + usize::from(self.first_screen.is_some());
        if stale > 0 {
            debug!("discarding {} stale screen(s)", stale);
        }
        self.pending.clear();
        self.first_screen = None;
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Connection-level failures leave the transport Disconnected
    fn settle_error(&mut self, error: BridgeError) -> BridgeError {
        // An overlong inbound record leaves the stream out of step
        let fatal = matches!(
            error,
            BridgeError::ConnectionLost { .. }
                | BridgeError::Io(_)
                | BridgeError::Protocol(ProtocolError::RecordTooLong { .. })
        );
        if fatal {
            warn!("session to {} lost: {}", self.config.address(), error);
            self.stream = None;
            self.pending.clear();
            self.first_screen = None;
            self.state = TransportState::Disconnected;
            if let BridgeError::Io(e) = error {
                return BridgeError::ConnectionLost { reason: e.to_string() };
            }
        }
        error
    }

    fn ensure_connected(&self) -> BridgeResult<()> {
        if self.state == TransportState::Connected {
            Ok(())
        } else {
            Err(BridgeError::NotConnected)
        }
    }
}

#[async_trait]
impl SessionTransport for TcpSessionTransport {
    async fn connect(&mut self) -> BridgeResult<()> {
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.state = TransportState::Connecting;
        match self.open().await {
            Ok(()) => {
                self.state = TransportState::Connected;
                Ok(())
            }
            Err(e) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.state == TransportState::Disconnected && self.stream.is_none() {
            return;
        }
        self.state = TransportState::Closing;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("shutdown of {} failed: {}", self.config.address(), e);
            }
        }
        self.pending.clear();
        self.first_screen = None;
        self.state = TransportState::Disconnected;
        debug!("disconnected from {}", self.config.address());
    }

    async fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.ensure_connected()?;
        let record = wrap_record(OPCODE_PUT_GET, 0, bytes)?;
        if let Err(e) = self.discard_stale().await {
            return Err(self.settle_error(e));
        }

        trace!("sending {} byte record", record.len());
        if let Err(e) = self.write_all(&frame_record(&record)).await {
            return Err(self.settle_error(e));
        }
        Ok(())
    }

    async fn receive(&mut self) -> BridgeResult<ScreenState> {
        self.ensure_connected()?;
        if let Some(screen) = self.first_screen.take() {
            return Ok(screen);
        }

        let limit = self.config.timeout();
        let record = match timeout(limit, self.next_record()).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => return Err(self.settle_error(e)),
            Err(_) => return Err(BridgeError::ReceiveTimeout { timeout: limit }),
        };
        self.decode(&record)
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn receive_timeout(&self) -> Duration {
        self.config.timeout()
    }

    fn charset(&self) -> Charset {
        self.config.charset
    }
}

fn profile_for(config: &SessionConfig) -> TerminalProfile {
    TerminalProfile {
        terminal_type: config.terminal_type.clone(),
        device_name: config.device_name.clone(),
        credentials: config.credentials.clone(),
    }
}
