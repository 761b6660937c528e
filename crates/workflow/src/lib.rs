//! Fluent workflow builder and runner adapter (C6, C7).
//!
//! [`WorkflowBuilder`] accumulates agents, steps, and swarm-level options
//! into a [`WorkflowDocument`]; [`WorkflowRunner`] serializes that document,
//! invokes the external runner process, and stream-parses its progress
//! output into typed events and step results.

mod builder;
mod config;
mod error;
mod line_parser;
mod runner;

pub use builder::{dag, fan_out, pipeline, FanOutTask, PipelineStage, WorkflowBuilder};
pub use config::{
    Coordination, ConsensusStrategy, ErrorHandling, ErrorStrategy, SharedState,
    SharedStateBackend, SwarmConfig, SwarmPattern, Trajectory, TrajectoryOptions, WorkflowAgent,
    WorkflowDef, WorkflowDocument, WorkflowStep, CONFIG_VERSION,
};
pub use error::WorkflowError;
pub use line_parser::{RunStatus, RunnerLine, RunnerLineParser, StepStatus};
pub use runner::{
    StepResult, WorkflowEvent, WorkflowEventListener, WorkflowResult, WorkflowRunOptions,
    WorkflowRunner,
};
