//! Scripted transport for tests
//!
//! Every clone of a [`FakeSessionTransport`] shares one script, so a test can
//! hand a clone to the connection manager and keep another to queue host
//! behaviour and inspect what was sent. Nothing is global: two fakes never see
//! each other's scripts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::ebcdic::Charset;
use crate::error::{BridgeError, BridgeResult};
use crate::screen::ScreenState;
use crate::transport::{SessionTransport, TransportState};

/// What the next `connect` does
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Succeed,
    Refuse(String),
    /// Never completes; the caller's timeout has to fire
    Hang,
    RejectAuth(String),
}

/// What the next `receive` does
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    Screen(ScreenState),
    /// Deliver a screen after a delay
    Delayed(Duration, ScreenState),
    /// Wait out the receive timeout, then fail
    Timeout,
    ConnectionLost(String),
}

#[derive(Debug)]
struct Script {
    state: TransportState,
    connects: VecDeque<ConnectOutcome>,
    receives: VecDeque<ReceiveOutcome>,
    sent: Vec<Vec<u8>>,
    connect_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct FakeSessionTransport {
    script: Arc<Mutex<Script>>,
    receive_timeout: Duration,
    charset: Charset,
}

impl Default for FakeSessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSessionTransport {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                state: TransportState::Disconnected,
                connects: VecDeque::new(),
                receives: VecDeque::new(),
                sent: Vec::new(),
                connect_attempts: 0,
            })),
            receive_timeout: Duration::from_secs(1),
            charset: Charset::default(),
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// Queue connect outcomes. Once the queue is empty, connects succeed.
    pub fn push_connect(&self, outcome: ConnectOutcome) -> &Self {
        self.lock().connects.push_back(outcome);
        self
    }

    pub fn push_receive(&self, outcome: ReceiveOutcome) -> &Self {
        self.lock().receives.push_back(outcome);
        self
    }

    pub fn push_screen(&self, screen: ScreenState) -> &Self {
        self.push_receive(ReceiveOutcome::Screen(screen))
    }

    /// Every byte sequence passed to `send`, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn pending_receives(&self) -> usize {
        self.lock().receives.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread must not hide the script from the others
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: TransportState) {
        self.lock().state = state;
    }
}

#[async_trait]
impl SessionTransport for FakeSessionTransport {
    async fn connect(&mut self) -> BridgeResult<()> {
        let outcome = {
            let mut script = self.lock();
            if script.state == TransportState::Connected {
                return Ok(());
            }
            script.state = TransportState::Connecting;
            script.connect_attempts += 1;
            script.connects.pop_front().unwrap_or(ConnectOutcome::Succeed)
        };
        debug!("fake connect: {:?}", outcome);

        match outcome {
            ConnectOutcome::Succeed => {
                self.set_state(TransportState::Connected);
                Ok(())
            }
            ConnectOutcome::Refuse(reason) => {
                self.set_state(TransportState::Disconnected);
                Err(BridgeError::ConnectionFailed { reason })
            }
            ConnectOutcome::RejectAuth(reason) => {
                self.set_state(TransportState::Disconnected);
                Err(BridgeError::Authentication { reason })
            }
            ConnectOutcome::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn disconnect(&mut self) {
        self.set_state(TransportState::Disconnected);
    }

    async fn send(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        let mut script = self.lock();
        if script.state != TransportState::Connected {
            return Err(BridgeError::NotConnected);
        }
        script.sent.push(bytes.to_vec());
        Ok(())
    }

    async fn receive(&mut self) -> BridgeResult<ScreenState> {
        let next = {
            let mut script = self.lock();
            if script.state != TransportState::Connected {
                return Err(BridgeError::NotConnected);
            }
            script.receives.pop_front()
        };

        match next {
            Some(ReceiveOutcome::Screen(screen)) => Ok(screen),
            Some(ReceiveOutcome::Delayed(delay, screen)) => {
                if delay >= self.receive_timeout {
                    tokio::time::sleep(self.receive_timeout).await;
                    self.lock().receives.push_front(ReceiveOutcome::Delayed(
                        delay - self.receive_timeout,
                        screen,
                    ));
                    return Err(BridgeError::ReceiveTimeout { timeout: self.receive_timeout });
                }
                tokio::time::sleep(delay).await;
                Ok(screen)
            }
            Some(ReceiveOutcome::ConnectionLost(reason)) => {
                self.set_state(TransportState::Disconnected);
                Err(BridgeError::ConnectionLost { reason })
            }
            Some(ReceiveOutcome::Timeout) | None => {
                tokio::time::sleep(self.receive_timeout).await;
                Err(BridgeError::ReceiveTimeout { timeout: self.receive_timeout })
            }
        }
    }

    fn state(&self) -> TransportState {
        self.lock().state
    }

    fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    fn charset(&self) -> Charset {
        self.charset
    }
}
