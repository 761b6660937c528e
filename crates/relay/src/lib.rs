//! High-level facade over the Agent Relay broker protocol client: agent
//! handles, derived lifecycle status tracked from the broker's event
//! stream, and wait-for-condition primitives.

mod agent;
pub mod error;
mod relay;
mod state;

pub use agent::Agent;
pub use error::RelayError;
pub use relay::AgentRelay;
pub use state::{AgentHandle, AgentStatus, Message, RelayEvent, WaitOutcome};

pub use agent_relay_client::{AgentRuntime, AgentSpec, ClientOptions, RestartPolicy};
