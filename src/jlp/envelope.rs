//! JLP message envelopes.
//!
//! Inbound (agent → orchestrator) and outbound (orchestrator → agent)
//! envelope shapes, plus the validation rules that make framing and
//! parsing a single responsibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Recognized inbound message types (agent → orchestrator).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboundType {
    Handshake,
    Summary,
    Heartbeat,
    Status,
    Error,
    Log,
    Ack,
    WidgetFrame,
}

/// Inbound JLP message envelope (agent → orchestrator).
///
/// Unknown fields inside `data` are preserved verbatim; unknown top-level
/// fields are rejected in strict mode (the default for live sessions).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: InboundType,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub agent_label: String,
    pub protocol_version: String,
    pub agent_version: String,
    #[serde(default = "default_data")]
    pub data: Value,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub health: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub min_app_version: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Value>,
}

fn default_data() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Known top-level envelope fields; anything else trips strict validation.
const KNOWN_FIELDS: &[&str] = &[
    "type",
    "timestamp",
    "agent_id",
    "agent_label",
    "protocol_version",
    "agent_version",
    "data",
    "metrics",
    "health",
    "message",
    "min_app_version",
    "capabilities",
];

impl InboundEnvelope {
    /// Parse and validate a single decoded NDJSON line.
    ///
    /// `strict` rejects unknown top-level fields (the default for live
    /// agent sessions); diagnostics-only replay tooling may pass `false`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Jlp`] when the line is not valid JSON, when an
    /// unknown top-level field is present under strict mode, or when a
    /// type-specific required field (`handshake` needs `min_app_version`
    /// and `capabilities`; `error` needs `message`) is missing.
    pub fn parse(line: &str, strict: bool) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| AppError::Jlp(format!("invalid json: {err}")))?;

        if strict {
            if let Value::Object(map) = &value {
                for key in map.keys() {
                    if !KNOWN_FIELDS.contains(&key.as_str()) {
                        return Err(AppError::Jlp(format!(
                            "unknown_envelope_field: {key}"
                        )));
                    }
                }
            }
        }

        let envelope: Self = serde_json::from_value(value)
            .map_err(|err| AppError::Jlp(format!("invalid envelope: {err}")))?;

        envelope.validate_required_fields()?;
        Ok(envelope)
    }

    fn validate_required_fields(&self) -> Result<()> {
        match self.kind {
            InboundType::Handshake => {
                if self.min_app_version.is_none() {
                    return Err(AppError::Jlp(
                        "handshake missing required field: min_app_version".into(),
                    ));
                }
                if self.capabilities.is_none() {
                    return Err(AppError::Jlp(
                        "handshake missing required field: capabilities".into(),
                    ));
                }
            }
            InboundType::Error => {
                if self.message.is_none() {
                    return Err(AppError::Jlp(
                        "error missing required field: message".into(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether this is a canonical evidence-plane record: only
    /// `summary` is written to the evidence sink; everything else is
    /// diagnostics.
    #[must_use]
    pub fn is_evidence(&self) -> bool {
        matches!(self.kind, InboundType::Summary)
    }
}

/// Recognized outbound command names (orchestrator → agent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboundCmd {
    Flush,
    Stop,
    Start,
    Shutdown,
    Status,
    Sequence,
    Ack,
    Reject,
    WidgetRender,
    WidgetAction,
}

/// Outbound JLP command envelope (orchestrator → agent).
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCommand {
    pub cmd: OutboundCmd,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OutboundCommand {
    /// A bare `{cmd}` command with no arguments, e.g. `flush` or `start`.
    #[must_use]
    pub fn bare(cmd: OutboundCmd) -> Self {
        Self {
            cmd,
            args: None,
            id: None,
            sequence: None,
            accepted: None,
            app_version: None,
            protocol_version: None,
            reason: None,
        }
    }

    /// Build the handshake acceptance command.
    #[must_use]
    pub fn accept_handshake(app_version: String, protocol_version: String) -> Self {
        Self {
            accepted: Some(true),
            app_version: Some(app_version),
            protocol_version: Some(protocol_version),
            ..Self::bare(OutboundCmd::Ack)
        }
    }

    /// Build the handshake rejection command.
    #[must_use]
    pub fn reject_handshake(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::bare(OutboundCmd::Reject)
        }
    }

    /// Build the shutdown sequence command: `stop`, `flush`, `shutdown` in order.
    #[must_use]
    pub fn shutdown_sequence() -> Self {
        Self {
            sequence: Some(vec!["stop".into(), "flush".into(), "shutdown".into()]),
            ..Self::bare(OutboundCmd::Sequence)
        }
    }

    /// Serialize to a single NDJSON line (no trailing newline; the codec adds it).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Jlp`] if serialization fails (should not happen
    /// for well-formed values).
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| AppError::Jlp(format!("encode failure: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_heartbeat() {
        let line = r#"{"type":"heartbeat","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1"}"#;
        let env = InboundEnvelope::parse(line, true).unwrap();
        assert_eq!(env.kind, InboundType::Heartbeat);
        assert!(!env.is_evidence());
    }

    #[test]
    fn summary_is_evidence_everything_else_is_diagnostics() {
        let line = r#"{"type":"summary","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1"}"#;
        let env = InboundEnvelope::parse(line, true).unwrap();
        assert!(env.is_evidence());

        let status_line = r#"{"type":"status","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1"}"#;
        let status = InboundEnvelope::parse(status_line, true).unwrap();
        assert!(!status.is_evidence());
    }

    #[test]
    fn handshake_requires_min_app_version_and_capabilities() {
        let line = r#"{"type":"handshake","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1"}"#;
        let err = InboundEnvelope::parse(line, true).unwrap_err();
        assert!(matches!(err, AppError::Jlp(_)));
    }

    #[test]
    fn error_requires_message() {
        let line = r#"{"type":"error","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1"}"#;
        let err = InboundEnvelope::parse(line, true).unwrap_err();
        assert!(matches!(err, AppError::Jlp(_)));
    }

    #[test]
    fn strict_mode_rejects_unknown_top_level_field() {
        let line = r#"{"type":"heartbeat","timestamp":"2026-07-27T00:00:00Z","agent_id":"a1","agent_label":"folderwatch","protocol_version":"0.3","agent_version":"1.2.1","bogus":true}"#;
        let err = InboundEnvelope::parse(line, true).unwrap_err();
        assert!(matches!(err, AppError::Jlp(_)));
        assert!(InboundEnvelope::parse(line, false).is_ok());
    }

    #[test]
    fn outbound_command_round_trips_through_encoding() {
        let cmd = OutboundCommand::accept_handshake("1.0.0".into(), "0.3".into());
        let line = cmd.to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["cmd"], "ack");
        assert_eq!(value["accepted"], true);
    }
}
