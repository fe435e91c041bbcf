//! Control IPC wire types.
//!
//! Command envelope: `{cmd, request_id, ...args}`. Response envelope:
//! `{ok, cmd, request_id, timestamp, data?, error?}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ipc_codes;

/// Inbound request from a Control client.
#[derive(Debug, Clone, Deserialize)]
pub struct IpcRequest {
    pub cmd: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl IpcRequest {
    /// Fetch a required string field from `args`.
    ///
    /// # Errors
    ///
    /// Returns `missing_field:<name>` as an `Err` code when absent.
    pub fn required_str(&self, field: &str) -> Result<&str, String> {
        self.args
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{}:{field}", ipc_codes::MISSING_FIELD_PREFIX))
    }

    /// Fetch an optional string field from `args`.
    #[must_use]
    pub fn optional_str(&self, field: &str) -> Option<&str> {
        self.args.get(field).and_then(Value::as_str)
    }
}

/// Outbound response to a Control client.
#[derive(Debug, Clone, Serialize)]
pub struct IpcResponse {
    pub ok: bool,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    /// Build a successful response.
    #[must_use]
    pub fn success(cmd: impl Into<String>, request_id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            cmd: cmd.into(),
            request_id,
            timestamp: Utc::now(),
            data: Some(data),
            error: None,
        }
    }

    /// Build a failure response carrying a canonical error code.
    #[must_use]
    pub fn failure(cmd: impl Into<String>, request_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            cmd: cmd.into(),
            request_id,
            timestamp: Utc::now(),
            data: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flattened_args() {
        let raw = r#"{"cmd":"start_agent","request_id":"r1","label":"folderwatch"}"#;
        let request: IpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.cmd, "start_agent");
        assert_eq!(request.required_str("label").unwrap(), "folderwatch");
    }

    #[test]
    fn missing_required_field_yields_missing_field_code() {
        let raw = r#"{"cmd":"start_agent","request_id":"r1"}"#;
        let request: IpcRequest = serde_json::from_str(raw).unwrap();
        let err = request.required_str("label").unwrap_err();
        assert_eq!(err, "missing_field:label");
    }

    #[test]
    fn success_response_serializes_ok_true() {
        let response = IpcResponse::success("ping", Some("r1".into()), serde_json::json!({}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["cmd"], "ping");
    }
}
