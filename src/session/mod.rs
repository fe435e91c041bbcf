//! Agent Session: the state machine wrapping one supervised process.
//!
//! `spawned → handshaking → running → shutting-down → exited|errored`.
//! A session owns the pending-ack queue, last-heartbeat timestamp, and
//! flush deadline for exactly one running agent instance.

pub mod handshake;
pub mod reader;
pub mod writer;

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::jlp::envelope::InboundEnvelope;
use crate::{AppError, Result};

/// Fine-grained lifecycle state of one running session.
///
/// Distinct from [`crate::registry::InstanceState`], the coarse state
/// Control observes; this machine tracks the handshake/ack machinery
/// internal to one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Spawned,
    Handshaking,
    Running,
    ShuttingDown,
    Exited,
    Errored,
}

impl SessionState {
    /// Whether transitioning from `self` to `next` is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Spawned, Self::Handshaking)
                | (Self::Handshaking, Self::Running)
                | (Self::Handshaking, Self::Errored)
                | (Self::Running, Self::ShuttingDown)
                | (Self::Running, Self::Errored)
                | (Self::ShuttingDown, Self::Exited)
                | (Self::ShuttingDown, Self::Errored)
        )
    }
}

/// Events a session's reader/writer/timers raise up to the Orchestrator Core.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Summary { data: serde_json::Value },
    Diagnostic { event: &'static str, data: serde_json::Value },
    Ack { cmd: String },
    HeartbeatReceived,
    Terminated { reason: String },
    ProtocolViolation { detail: String },
}

/// Runtime state for one supervised agent process.
pub struct AgentSession {
    pub agent_id: String,
    pub label: String,
    pub state: SessionState,
    pub detail: Option<String>,
    /// Commands sent that await an in-order ACK.
    pub pending_acks: VecDeque<String>,
    pub last_heartbeat_at: Instant,
    pub next_flush_at: Instant,
    pub last_flush_at: Instant,
    pub handshake_started_at: DateTime<Utc>,
    pub consecutive_flush_failures: u32,
}

impl AgentSession {
    /// Create a freshly spawned session, not yet handshaking.
    #[must_use]
    pub fn new(agent_id: String, label: String, now: Instant) -> Self {
        Self {
            agent_id,
            label,
            state: SessionState::Spawned,
            detail: None,
            pending_acks: VecDeque::new(),
            last_heartbeat_at: now,
            next_flush_at: now,
            last_flush_at: now,
            handshake_started_at: Utc::now(),
            consecutive_flush_failures: 0,
        }
    }

    /// Attempt a state transition, validating it against [`SessionState::can_transition_to`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidStateTransition`] if `next` is not reachable
    /// from the current state.
    pub fn transition(&mut self, next: SessionState, detail: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "session {}: {:?} -> {:?} not permitted",
                self.agent_id, self.state, next
            )));
        }
        self.state = next;
        self.detail = detail;
        Ok(())
    }

    /// Record receipt of an in-order ACK; enforces that it matches the head
    /// of the pending-ack queue.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Lifecycle`] if `cmd` does not match the expected
    /// next ACK, or if no ACK was pending.
    pub fn record_ack(&mut self, cmd: &str) -> Result<()> {
        match self.pending_acks.front() {
            Some(expected) if expected == cmd => {
                self.pending_acks.pop_front();
                Ok(())
            }
            Some(expected) => Err(AppError::Lifecycle(format!(
                "session {}: out-of-order ack, expected '{expected}' got '{cmd}'",
                self.agent_id
            ))),
            None => Err(AppError::Lifecycle(format!(
                "session {}: unexpected ack '{cmd}', none pending",
                self.agent_id
            ))),
        }
    }

    /// Route a decoded inbound envelope: `summary` is evidence, everything
    /// else is diagnostics.
    #[must_use]
    pub fn route(&self, envelope: &InboundEnvelope) -> SessionEvent {
        use crate::jlp::envelope::InboundType;

        match envelope.kind {
            InboundType::Summary => SessionEvent::Summary {
                data: envelope.data.clone(),
            },
            InboundType::Heartbeat => SessionEvent::HeartbeatReceived,
            InboundType::Ack => {
                let cmd = envelope
                    .data
                    .get("cmd")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                SessionEvent::Ack { cmd }
            }
            InboundType::Status => SessionEvent::Diagnostic {
                event: "status",
                data: envelope.data.clone(),
            },
            InboundType::Error => SessionEvent::Diagnostic {
                event: "error",
                data: envelope.data.clone(),
            },
            InboundType::Log => SessionEvent::Diagnostic {
                event: "log",
                data: envelope.data.clone(),
            },
            InboundType::WidgetFrame => SessionEvent::Diagnostic {
                event: "widget_frame",
                data: envelope.data.clone(),
            },
            InboundType::Handshake => SessionEvent::Diagnostic {
                event: "handshake",
                data: envelope.data.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_lifecycle_transitions_succeed() {
        let mut session = AgentSession::new("a1".into(), "folderwatch".into(), Instant::now());
        session.transition(SessionState::Handshaking, None).unwrap();
        session.transition(SessionState::Running, None).unwrap();
        session.transition(SessionState::ShuttingDown, None).unwrap();
        session.transition(SessionState::Exited, None).unwrap();
    }

    #[test]
    fn skipping_handshaking_is_rejected() {
        let mut session = AgentSession::new("a1".into(), "folderwatch".into(), Instant::now());
        let err = session.transition(SessionState::Running, None).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
    }

    #[test]
    fn out_of_order_ack_is_rejected() {
        let mut session = AgentSession::new("a1".into(), "folderwatch".into(), Instant::now());
        session.pending_acks.push_back("stop".into());
        session.pending_acks.push_back("flush".into());
        let err = session.record_ack("flush").unwrap_err();
        assert!(matches!(err, AppError::Lifecycle(_)));
        session.record_ack("stop").unwrap();
        session.record_ack("flush").unwrap();
    }

    #[test]
    fn status_routes_to_diagnostics_not_evidence() {
        use crate::jlp::envelope::{InboundEnvelope, InboundType};
        let line = r#"{"type":"status","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1"}"#;
        let envelope = InboundEnvelope::parse(line, true).unwrap();
        assert_eq!(envelope.kind, InboundType::Status);

        let session = AgentSession::new("a1".into(), "folderwatch".into(), Instant::now());
        match session.route(&envelope) {
            SessionEvent::Diagnostic { event, .. } => assert_eq!(event, "status"),
            other => panic!("expected Diagnostic, got {other:?}"),
        }
    }
}
