//! Multi-screen navigation
//!
//! The host answers every AID key with exactly one screen, so a command batch
//! is cut into segments that each end at a `PressKey` (or a local
//! `WaitForScreen`). A segment is encoded in full against the current screen
//! before any of its bytes go out; a rejected command sends nothing.
//!
//! The navigator never retries on its own. When a step lands on the wrong
//! screen the caller gets `ScreenNavigation` and decides whether to call
//! [`ScreenNavigator::recover`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::command::{Command, KeyCode};
use crate::encoder::{CommandEncoder, Encoded};
use crate::error::{BridgeError, BridgeResult, EncodingError};
use crate::screen::ScreenState;
use crate::transport::SessionTransport;
use crate::validation::ValidationRules;

/// Borrowing driver over one live session
pub struct ScreenNavigator<'a, T: SessionTransport + ?Sized> {
    transport: &'a mut T,
    encoder: CommandEncoder,
    current: Option<ScreenState>,
    step_timeout: Duration,
    audit: Option<(Arc<dyn AuditSink>, Uuid)>,
}

impl<'a, T: SessionTransport + ?Sized> ScreenNavigator<'a, T> {
    pub fn new(transport: &'a mut T, step_timeout: Duration) -> Self {
        let encoder = CommandEncoder::new(transport.charset());
        Self {
            transport,
            encoder,
            current: None,
            step_timeout,
            audit: None,
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, session_id: Uuid) -> Self {
        self.audit = Some((sink, session_id));
        self
    }

    /// Start from a known screen instead of reading one from the host
    pub fn with_current(mut self, screen: ScreenState) -> Self {
        self.current = Some(screen);
        self
    }

    /// Last screen seen, with local field edits applied
    pub fn current(&self) -> Option<&ScreenState> {
        self.current.as_ref()
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Read the next screen from the host
    pub async fn refresh(&mut self) -> BridgeResult<ScreenState> {
        let screen = self.transport.receive().await?;
        self.current = Some(screen.clone());
        Ok(screen)
    }

    /// Run `via` and settle on the screen identified as `target`.
    pub async fn go_to(&mut self, target: &str, via: Vec<Command>) -> BridgeResult<ScreenState> {
        self.navigate(&format!("go_to({target})"), target, via, None).await
    }

    /// Like [`Self::go_to`], but no step starts after `deadline` and waits
    /// are cut short by it.
    pub async fn go_to_before(
        &mut self,
        deadline: Instant,
        target: &str,
        via: Vec<Command>,
    ) -> BridgeResult<ScreenState> {
        self.navigate(&format!("go_to({target})"), target, via, Some(deadline)).await
    }

    /// Wait until a freshly received screen contains `pattern`.
    ///
    /// The screen already held is not consulted.
    pub async fn wait_for_screen(&mut self, pattern: &str, wait: Duration) -> BridgeResult<ScreenState> {
        let result = self.poll_for(pattern, wait).await;
        self.emit(&format!("wait_for_screen({pattern})"), &result);
        result
    }

    /// Press each reset key in turn, then settle on `home`.
    ///
    /// Only runs when the caller asks for it.
    pub async fn recover(&mut self, reset_keys: &[KeyCode], home: &str) -> BridgeResult<ScreenState> {
        warn!("recovering to '{}' with {:?}", home, reset_keys);
        let via = reset_keys.iter().copied().map(Command::press).collect();
        self.navigate(&format!("recover({home})"), home, via, None).await
    }

    /// Validate and write several fields in one request. No AID is sent.
    pub async fn fill_fields(
        &mut self,
        values: &[(&str, &str)],
        rules: &ValidationRules,
    ) -> BridgeResult<ScreenState> {
        let result = self.write_fields(values, rules).await;
        self.emit("fill_fields", &result);
        result
    }

    async fn write_fields(
        &mut self,
        values: &[(&str, &str)],
        rules: &ValidationRules,
    ) -> BridgeResult<ScreenState> {
        rules.validate(values)?;
        let screen = self.ensure_current().await?;

        let commands: Vec<Command> = values
            .iter()
            .map(|(id, value)| Command::set_field(*id, *value))
            .collect();
        let encoded = self.encoder.encode_batch(&commands, &screen)?;
        let bytes = concat_bytes(&encoded);
        let updated = apply_field_values(screen, &commands)?;

        if !bytes.is_empty() {
            self.transport.send(&bytes).await?;
        }
        self.current = Some(updated.clone());
        Ok(updated)
    }

    async fn navigate(
        &mut self,
        action: &str,
        target: &str,
        via: Vec<Command>,
        deadline: Option<Instant>,
    ) -> BridgeResult<ScreenState> {
        debug!("{}: {} command(s)", action, via.len());
        let result = match self.run(target, via, deadline).await {
            Err(BridgeError::ReceiveTimeout { .. }) => Err(self.navigation_error(target)),
            Err(BridgeError::WaitTimeout { .. }) if deadline_passed(deadline) => {
                Err(self.navigation_error(target))
            }
            other => other,
        };
        self.emit(action, &result);
        result
    }

    async fn run(
        &mut self,
        target: &str,
        via: Vec<Command>,
        deadline: Option<Instant>,
    ) -> BridgeResult<ScreenState> {
        let screen = self.ensure_current().await?;
        if via.is_empty() && screen.screen_id() == Some(target) {
            return Ok(screen);
        }

        for segment in segments(via) {
            if deadline_passed(deadline) {
                return Err(self.navigation_error(target));
            }
            self.run_segment(segment, deadline).await?;
        }

        self.settle(target, deadline).await
    }

    async fn run_segment(&mut self, segment: Vec<Command>, deadline: Option<Instant>) -> BridgeResult<()> {
        let screen = self.ensure_current().await?;
        let encoded = self.encoder.encode_batch(&segment, &screen)?;
        let bytes = concat_bytes(&encoded);
        let updated = apply_field_values(screen, &segment)?;

        if !bytes.is_empty() {
            trace!("sending {} byte(s) for {} command(s)", bytes.len(), segment.len());
            self.transport.send(&bytes).await?;
        }
        self.current = Some(updated);

        match encoded.into_iter().last() {
            Some(Encoded::LocalWait { pattern, timeout: wait }) => {
                let wait = match deadline {
                    Some(deadline) => wait.min(deadline.saturating_duration_since(Instant::now())),
                    None => wait,
                };
                self.poll_for(&pattern, wait).await?;
            }
            _ if segment.last().map_or(false, Command::expects_response) => {
                let limit = self.step_limit(deadline);
                let screen = self.receive_until(limit).await?;
                self.current = Some(screen);
            }
            _ => {}
        }
        Ok(())
    }

    /// Keep reading until the current screen is `target`
    async fn settle(&mut self, target: &str, deadline: Option<Instant>) -> BridgeResult<ScreenState> {
        let limit = self.step_limit(deadline);
        loop {
            if let Some(screen) = &self.current {
                if screen.screen_id() == Some(target) {
                    return Ok(screen.clone());
                }
                debug!(
                    "waiting for '{}', host is on {:?}",
                    target,
                    screen.screen_id()
                );
            }
            let screen = self.receive_until(limit).await?;
            self.current = Some(screen);
        }
    }

    async fn poll_for(&mut self, pattern: &str, wait: Duration) -> BridgeResult<ScreenState> {
        let limit = Instant::now() + wait;
        loop {
            let remaining = limit.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BridgeError::WaitTimeout { pattern: pattern.to_string(), timeout: wait });
            }
            match timeout(remaining, self.transport.receive()).await {
                Ok(Ok(screen)) => {
                    let found = screen.matches(pattern);
                    self.current = Some(screen.clone());
                    if found {
                        return Ok(screen);
                    }
                }
                Ok(Err(BridgeError::ReceiveTimeout { .. })) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(BridgeError::WaitTimeout { pattern: pattern.to_string(), timeout: wait })
                }
            }
        }
    }

    /// One screen, retrying receive timeouts until `limit`
    async fn receive_until(&mut self, limit: Instant) -> BridgeResult<ScreenState> {
        loop {
            let remaining = limit.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BridgeError::ReceiveTimeout { timeout: self.step_timeout });
            }
            match timeout(remaining, self.transport.receive()).await {
                Ok(Ok(screen)) => return Ok(screen),
                Ok(Err(BridgeError::ReceiveTimeout { .. })) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(BridgeError::ReceiveTimeout { timeout: self.step_timeout }),
            }
        }
    }

    async fn ensure_current(&mut self) -> BridgeResult<ScreenState> {
        if let Some(screen) = &self.current {
            return Ok(screen.clone());
        }
        self.refresh().await
    }

    fn step_limit(&self, deadline: Option<Instant>) -> Instant {
        let step = Instant::now() + self.step_timeout;
        deadline.map_or(step, |deadline| deadline.min(step))
    }

    fn navigation_error(&self, target: &str) -> BridgeError {
        BridgeError::ScreenNavigation {
            expected: target.to_string(),
            actual: self
                .current
                .as_ref()
                .and_then(|screen| screen.screen_id())
                .map(str::to_string),
        }
    }

    fn emit<R>(&self, action: &str, result: &BridgeResult<R>) {
        if let Some((sink, session_id)) = &self.audit {
            sink.record(AuditEvent::from_result(*session_id, action, result));
        }
    }
}

/// Split at every command the host (or a local wait) has to answer
fn segments(commands: Vec<Command>) -> Vec<Vec<Command>> {
    let mut out = Vec::new();
    let mut segment = Vec::new();
    for command in commands {
        let closes = matches!(command, Command::PressKey { .. } | Command::WaitForScreen { .. });
        segment.push(command);
        if closes {
            out.push(std::mem::take(&mut segment));
        }
    }
    if !segment.is_empty() {
        out.push(segment);
    }
    out
}

fn concat_bytes(encoded: &[Encoded]) -> Vec<u8> {
    encoded
        .iter()
        .filter_map(Encoded::bytes)
        .flatten()
        .copied()
        .collect()
}

/// Mirror sent field writes onto the local snapshot
fn apply_field_values(screen: ScreenState, commands: &[Command]) -> BridgeResult<ScreenState> {
    let mut screen = screen;
    for command in commands {
        if let Command::SetField { id, value } = command {
            screen = screen
                .with_field_value(id, value)
                .map_err(EncodingError::from)?;
        }
    }
    Ok(screen)
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |deadline| Instant::now() >= deadline)
}
