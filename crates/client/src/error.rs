use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the protocol client.
///
/// `Protocol` carries an error the broker itself reported on a request;
/// everything else is this side's problem — spawn failure, a dead
/// subprocess, a timeout, or a malformed response.
#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("broker binary `{binary}` not found")]
    BinaryNotFound { binary: String },

    #[error("failed to spawn broker binary `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::sync::Arc<std::io::Error>,
    },

    #[error("broker is not running")]
    NotRunning,

    #[error("broker exited (code={code:?}){}", exit_detail(last_stderr_line))]
    ProcessExited {
        code: Option<i32>,
        last_stderr_line: Option<String>,
    },

    #[error("request timed out after {timeout:?} (type='{request_type}', request_id='{request_id}')")]
    Timeout {
        timeout: Duration,
        request_type: String,
        request_id: String,
    },

    #[error("unexpected response type '{actual}' for request '{request_id}' (expected '{expected}')")]
    UnexpectedResponseType {
        request_id: String,
        expected: String,
        actual: String,
    },

    #[error("broker reported error {code}: {message}")]
    Protocol {
        code: String,
        message: String,
        retryable: bool,
        data: Option<serde_json::Value>,
    },

    #[error("failed to serialize request payload: {0}")]
    Serialize(String),

    #[error("failed to deserialize response payload: {0}")]
    Deserialize(String),

    #[error("broker communication channel closed")]
    ChannelClosed,
}

fn exit_detail(last_stderr_line: &Option<String>) -> String {
    match last_stderr_line {
        Some(line) => format!(": {line}"),
        None => String::new(),
    }
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, ClientError::Protocol { .. })
    }

    pub fn is_process_error(&self) -> bool {
        matches!(
            self,
            ClientError::BinaryNotFound { .. }
                | ClientError::Spawn { .. }
                | ClientError::NotRunning
                | ClientError::ProcessExited { .. }
                | ClientError::UnexpectedResponseType { .. }
                | ClientError::ChannelClosed
        )
    }

    /// The broker's error code, if this is a [`ClientError::Protocol`].
    pub fn protocol_code(&self) -> Option<&str> {
        match self {
            ClientError::Protocol { code, .. } => Some(code),
            _ => None,
        }
    }
}
