//! Audit tuples
//!
//! The bridge reports what it did as plain [`AuditEvent`] values. Storing
//! them is the collaborator's business; a sink only receives them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Failure(ErrorKind),
}

/// One high-level operation against a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub session_id: Uuid,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
}

impl AuditEvent {
    pub fn new(session_id: Uuid, action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            session_id,
            action: action.into(),
            timestamp: Utc::now(),
            outcome,
        }
    }

    pub fn from_result<T>(session_id: Uuid, action: impl Into<String>, result: &BridgeResult<T>) -> Self {
        let outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.kind()),
        };
        Self::new(session_id, action, outcome)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}

/// Receives audit events as they happen
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes each event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        match event.outcome {
            AuditOutcome::Success => {
                info!("AUDIT session={} action={} outcome=success", event.session_id, event.action)
            }
            AuditOutcome::Failure(kind) => warn!(
                "AUDIT session={} action={} outcome=failure({:?})",
                event.session_id, event.action, kind
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_outcome_from_result() {
        let id = Uuid::new_v4();
        let ok: BridgeResult<()> = Ok(());
        let failed: BridgeResult<()> = Err(BridgeError::NotConnected);

        assert!(AuditEvent::from_result(id, "connect", &ok).is_success());
        let event = AuditEvent::from_result(id, "send", &failed);
        assert_eq!(event.outcome, AuditOutcome::Failure(ErrorKind::NotConnected));
        assert_eq!(event.session_id, id);
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();
        sink.record(AuditEvent::new(id, "connect", AuditOutcome::Success));
        sink.record(AuditEvent::new(id, "go_to(Menu)", AuditOutcome::Success));
        assert_eq!(sink.actions(), vec!["connect", "go_to(Menu)"]);
    }

    #[test]
    fn test_event_serializes_kind_tag() {
        let event = AuditEvent::new(
            Uuid::nil(),
            "connect",
            AuditOutcome::Failure(ErrorKind::Authentication),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Authentication"));
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
