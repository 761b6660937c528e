//! Async protocol client for the broker subprocess: spawns it, speaks the
//! line-delimited envelope protocol over its stdio, and exposes typed
//! request wrappers plus event/stderr subscriptions.

pub mod binary;
pub mod cli_args;
mod client;
pub mod error;
mod line_parser;
pub mod options;
pub mod requests;

pub use agent_relay_protocol::{AgentRuntime, AgentSpec, BrokerEvent, RestartPolicy};

pub use client::{ExitOutcome, ProtocolClient, Unsubscribe};
pub use error::ClientError;
pub use options::ClientOptions;
pub use requests::{
    PreflightAgentsRequest, ProtocolErrorPayload, ReleaseAgentRequest, SendInputRequest,
    SendMessageRequest, SendMessageResult, SetModelRequest, SpawnAgentRequest, SpawnAgentResult,
};
