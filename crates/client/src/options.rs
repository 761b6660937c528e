use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a [`crate::ProtocolClient`], mirroring the broker
/// subprocess's `init` command-line surface.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub binary_path: Option<String>,
    pub binary_args: Vec<String>,
    pub broker_name: Option<String>,
    pub channels: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub client_name: String,
    pub client_version: String,
    /// Bound on the event ring buffer (§3 "Event history is bounded to
    /// the most recent N (default 1000)").
    pub event_history_cap: usize,
    /// Per-line byte cap applied to both the stdout and stderr readers
    /// (§4.8's shared line-ingestion layer).
    pub max_line_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            binary_path: None,
            binary_args: Vec::new(),
            broker_name: None,
            channels: vec!["general".to_string()],
            cwd: None,
            env: None,
            request_timeout: Duration::from_millis(10_000),
            shutdown_timeout: Duration::from_millis(3_000),
            client_name: "agent-relay-sdk-rs".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            event_history_cap: 1000,
            max_line_bytes: 64 * 1024,
        }
    }
}
