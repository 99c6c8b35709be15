//! Connection management
//!
//! [`ConnectionManager`] owns at most one session. `connect_with_retry`
//! builds a transport through the manager's factory and keeps calling
//! `connect` on it until it succeeds, the attempt count runs out, or the
//! policy's overall budget would be crossed by the next back-off sleep.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink, LogAuditSink};
use crate::config::{RetryPolicy, SessionConfig};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::navigator::ScreenNavigator;
use crate::transport::SessionTransport;

/// Builds a fresh, disconnected transport for a session
pub type TransportFactory<T> = Box<dyn FnMut(&SessionConfig) -> T + Send>;

/// Outcome of one connect attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionAttempt {
    /// 1-based
    pub number: u32,
    pub duration: Duration,
    pub failure: Option<ErrorKind>,
    pub reason: Option<String>,
}

impl ConnectionAttempt {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct ConnectionManager<T: SessionTransport> {
    factory: TransportFactory<T>,
    session: Option<T>,
    config: Option<SessionConfig>,
    session_id: Uuid,
    attempts: Vec<ConnectionAttempt>,
    audit: Arc<dyn AuditSink>,
}

impl<T: SessionTransport> ConnectionManager<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut(&SessionConfig) -> T + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            session: None,
            config: None,
            session_id: Uuid::new_v4(),
            attempts: Vec::new(),
            audit: Arc::new(LogAuditSink),
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Establish a session, retrying per `policy`.
    ///
    /// Any previous session is closed first. Each attempt is bounded by the
    /// session's per-operation timeout; an attempt that hits it counts as a
    /// failed attempt. Authentication failures return at once.
    pub async fn connect_with_retry(
        &mut self,
        config: SessionConfig,
        policy: RetryPolicy,
    ) -> BridgeResult<&mut T> {
        config.validate()?;
        policy.validate()?;

        self.disconnect().await;
        self.attempts.clear();
        self.session_id = Uuid::new_v4();

        let host = config.address();
        let max_attempts = policy.attempts();
        let per_attempt = config.timeout();
        let mut delays = policy.backoff();
        let mut transport = (self.factory)(&config);
        let started = Instant::now();
        let mut made = 0;

        info!(
            "connecting to {} (session {}, up to {} attempt(s))",
            host, self.session_id, max_attempts
        );

        while made < max_attempts {
            made += 1;
            let attempt_started = Instant::now();
            let result = match timeout(per_attempt, transport.connect()).await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::ConnectionFailed {
                    reason: format!("attempt timed out after {}ms", per_attempt.as_millis()),
                }),
            };

            match result {
                Ok(()) => {
                    self.attempts.push(ConnectionAttempt {
                        number: made,
                        duration: attempt_started.elapsed(),
                        failure: None,
                        reason: None,
                    });
                    info!("connected to {} on attempt {}", host, made);
                    self.emit("connect", AuditOutcome::Success);
                    self.config = Some(config);
                    return Ok(self.session.insert(transport));
                }
                Err(e) => {
                    self.attempts.push(ConnectionAttempt {
                        number: made,
                        duration: attempt_started.elapsed(),
                        failure: Some(e.kind()),
                        reason: Some(e.to_string()),
                    });
                    transport.disconnect().await;

                    if let BridgeError::Authentication { .. } = e {
                        warn!("sign-on to {} rejected, not retrying: {}", host, e);
                        self.emit("connect", AuditOutcome::Failure(e.kind()));
                        return Err(e);
                    }
                    warn!("attempt {}/{} to {} failed: {}", made, max_attempts, host, e);
                }
            }

            if made == max_attempts {
                break;
            }

            let delay = delays.next().unwrap_or(Duration::ZERO);
            if started.elapsed() + delay > policy.timeout() {
                warn!(
                    "giving up on {}: next retry would exceed the {}ms budget",
                    host,
                    policy.timeout().as_millis()
                );
                break;
            }
            if !delay.is_zero() {
                debug!("retrying {} in {}ms", host, delay.as_millis());
                sleep(delay).await;
            }
        }

        let error = BridgeError::ConnectionTimeout {
            host,
            attempts: made,
            elapsed: started.elapsed(),
        };
        self.emit("connect", AuditOutcome::Failure(error.kind()));
        Err(error)
    }

    /// Close the owned session if any. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
            info!("session {} closed", self.session_id);
            self.emit("disconnect", AuditOutcome::Success);
        }
        self.config = None;
    }

    pub fn session_mut(&mut self) -> Option<&mut T> {
        self.session.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.is_connected())
    }

    /// Configuration of the live session
    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Attempts made by the most recent `connect_with_retry`
    pub fn last_attempts(&self) -> &[ConnectionAttempt] {
        &self.attempts
    }

    /// Navigator over the live session. Each step is bounded by the session's
    /// per-operation timeout.
    pub fn navigator(&mut self) -> BridgeResult<ScreenNavigator<'_, T>> {
        let step_timeout = self
            .config
            .as_ref()
            .map(SessionConfig::timeout)
            .ok_or(BridgeError::NotConnected)?;
        let session = self.session.as_mut().ok_or(BridgeError::NotConnected)?;
        Ok(ScreenNavigator::new(session, step_timeout)
            .with_audit(Arc::clone(&self.audit), self.session_id))
    }

    fn emit(&self, action: &str, outcome: AuditOutcome) {
        self.audit.record(AuditEvent::new(self.session_id, action, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::transport::{ConnectOutcome, FakeSessionTransport};

    fn manager(fake: &FakeSessionTransport) -> ConnectionManager<FakeSessionTransport> {
        let handle = fake.clone();
        ConnectionManager::new(move |_| handle.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_attempt_succeeds() {
        let fake = FakeSessionTransport::new();
        fake.push_connect(ConnectOutcome::Refuse("connection refused".into()));
        let mut manager = manager(&fake);

        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_millis(50));
        manager
            .connect_with_retry(SessionConfig::new("as400.example.com", 23), policy)
            .await
            .unwrap();

        assert!(manager.is_connected());
        assert_eq!(fake.connect_attempts(), 2);
        let attempts = manager.last_attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].failure, Some(ErrorKind::ConnectionFailed));
        assert!(attempts[1].succeeded());
    }

    #[tokio::test]
    async fn test_navigator_requires_session() {
        let fake = FakeSessionTransport::new();
        let mut manager = manager(&fake);
        assert!(matches!(manager.navigator(), Err(BridgeError::NotConnected)));
        manager.disconnect().await;
        manager.disconnect().await;
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_audit_events() {
        let fake = FakeSessionTransport::new();
        let sink = Arc::new(MemoryAuditSink::new());
        let mut manager = manager(&fake).with_audit(sink.clone());

        manager
            .connect_with_retry(SessionConfig::default(), RetryPolicy::new(1))
            .await
            .unwrap();
        let id = manager.session_id();
        manager.disconnect().await;

        let events = sink.events();
        assert_eq!(sink.actions(), vec!["connect", "disconnect"]);
        assert!(events.iter().all(|e| e.session_id == id && e.is_success()));
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_attempted() {
        let fake = FakeSessionTransport::new();
        let mut manager = manager(&fake);
        let config = SessionConfig::new("", 23);
        let err = manager
            .connect_with_retry(config, RetryPolicy::new(3))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(fake.connect_attempts(), 0);
    }
}
