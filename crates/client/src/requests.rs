//! Typed payloads for the broker requests named in §6 of the wire protocol.
//!
//! Most broker responses are treated as opaque passthroughs (§9's open
//! question) — callers get back a `serde_json::Value` and pick out what
//! they need. The handful of shapes this crate itself depends on (to
//! implement the `send_message` fallback, and to give callers a
//! reasonably typed spawn result) get a real struct.

use agent_relay_protocol::AgentSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `spawn_agent` request payload (§6).
#[derive(Debug, Clone, Serialize)]
pub struct SpawnAgentRequest {
    pub agent: AgentSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_threshold_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_from: Option<String>,
}

/// Result carried by a successful `spawn_agent` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnAgentResult {
    pub name: String,
    #[serde(default)]
    pub runtime: Option<String>,
}

/// `send_message` request payload (§6).
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result of a `send_message` request, including the synthetic result the
/// client wrapper fabricates when the broker reports the operation as
/// unsupported (§4.4 "Send-message fallback").
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SendMessageResult {
    pub event_id: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl SendMessageResult {
    /// The benign placeholder result synthesized when the broker doesn't
    /// support `send_message` at all.
    pub fn unsupported() -> Self {
        Self {
            event_id: "unsupported_operation".to_string(),
            targets: Vec::new(),
        }
    }
}

/// `release_agent` request payload.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseAgentRequest {
    pub name: String,
}

/// `send_input` request payload.
#[derive(Debug, Clone, Serialize)]
pub struct SendInputRequest {
    pub name: String,
    pub input: String,
}

/// `set_model` request payload.
#[derive(Debug, Clone, Serialize)]
pub struct SetModelRequest {
    pub name: String,
    pub model: String,
}

/// `preflight_agents` request payload.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightAgentsRequest {
    pub agents: Vec<AgentSpec>,
}

/// Error payload carried by a broker `error` envelope (§7).
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default)]
    pub data: Option<Value>,
}

/// The broker error code that triggers the `send_message` fallback (§4.4).
pub const UNSUPPORTED_OPERATION: &str = "unsupported_operation";
