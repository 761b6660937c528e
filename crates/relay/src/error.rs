use thiserror::Error;

pub use agent_relay_client::ClientError;

/// Errors surfaced by the relay facade.
///
/// Most of the underlying protocol-client failure modes pass straight
/// through as `Client`; the facade adds only the error shapes that are
/// specific to its own wait primitives and agent registry.
#[derive(Debug, Error, Clone)]
pub enum RelayError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("timed out waiting for agent `{name}` to become {condition}")]
    WaitTimeout { name: String, condition: String },

    #[error("agent `{name}` exited before sending its first message")]
    ExitedBeforeMessage { name: String },
}

impl RelayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::WaitTimeout { .. })
            || matches!(self, RelayError::Client(err) if err.is_timeout())
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, RelayError::Client(err) if err.is_protocol_error())
    }
}
