use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the workflow builder and runner adapter.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow `{name}` has no agents; at least one is required")]
    NoAgents { name: String },

    #[error("workflow `{name}` has no steps; at least one is required")]
    NoSteps { name: String },

    #[error("trajectory option `enable: false` cannot be combined with other trajectory options")]
    ConflictingTrajectoryOptions,

    #[error("fan_out/pipeline/dag template received an empty collection")]
    EmptyTemplateInput,

    #[error("runner binary could not be located (tried `agent-relay` and `npx agent-relay`)")]
    RunnerNotFound,

    #[error("failed to serialize workflow configuration: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("failed to write workflow configuration to {path}: {source}")]
    WriteConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn runner `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runner exited unexpectedly: {0}")]
    RunnerIo(#[source] std::io::Error),

    #[error("workflow run timed out after {0:?}")]
    Timeout(Duration),

    #[error("background task join failed: {0}")]
    Join(#[source] tokio::task::JoinError),
}

impl WorkflowError {
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            WorkflowError::NoAgents { .. }
                | WorkflowError::NoSteps { .. }
                | WorkflowError::ConflictingTrajectoryOptions
                | WorkflowError::EmptyTemplateInput
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkflowError::Timeout(_))
    }
}
