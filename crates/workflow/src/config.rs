//! The workflow configuration document (§3 "Workflow configuration").
//!
//! Every struct here is `camelCase` on the wire regardless of the
//! builder's own snake_case surface (§4.6), via a blanket
//! `rename_all = "camelCase"` rather than per-field renames.

use serde::{Deserialize, Serialize, Serializer};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwarmPattern {
    FanOut,
    Pipeline,
    Dag,
    Consensus,
    HubSpoke,
    ReviewLoop,
}

impl Default for SwarmPattern {
    fn default() -> Self {
        SwarmPattern::Dag
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmConfig {
    pub pattern: SwarmPattern,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_nudge_threshold_secs: Option<u64>,
}

/// One agent entry in the workflow's agent list (§4.6 constraints, plus
/// the template layer's `role`/`interactive` fields from §4.6's addendum).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAgent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_threshold_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

impl WorkflowAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cli: None,
            model: None,
            max_tokens: None,
            timeout_secs: None,
            retries: None,
            idle_threshold_secs: None,
            role: None,
            interactive: None,
        }
    }
}

/// One step in the workflow's ordered step list (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    pub agent: String,
    pub task: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            task: task.into(),
            depends_on: Vec::new(),
            verify: None,
            timeout_secs: None,
            retries: None,
        }
    }
}

/// A named ordered sequence of steps (§3's "workflow list"). The builder
/// always emits a single-element list carrying its own name and steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDef {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    FailFast,
    Continue,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandling {
    pub strategy: ErrorStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusStrategy {
    Majority,
    Unanimous,
    Quorum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordination {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub barriers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_strategy: Option<ConsensusStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedStateBackend {
    Memory,
    Redis,
    Database,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub backend: SharedStateBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryOptions {
    pub enable: bool,
    pub reflect_on_barriers: bool,
    pub reflect_on_converge: bool,
    pub auto_decisions: bool,
}

/// Trajectory recording config: either the literal disable marker, or a
/// full options object (§4.6 "the literal value 'disabled' is also
/// accepted and propagated as a disable marker").
#[derive(Debug, Clone, PartialEq)]
pub enum Trajectory {
    Disabled,
    Options(TrajectoryOptions),
}

impl Serialize for Trajectory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Trajectory::Disabled => serializer.serialize_str("disabled"),
            Trajectory::Options(options) => options.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Trajectory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Marker(String),
            Options(TrajectoryOptions),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Marker(marker) if marker == "disabled" => Ok(Trajectory::Disabled),
            Repr::Marker(other) => Err(serde::de::Error::custom(format!(
                "unrecognized trajectory marker `{other}`"
            ))),
            Repr::Options(options) => Ok(Trajectory::Options(options)),
        }
    }
}

/// The full configuration document the workflow builder emits and the
/// runner adapter serializes to a temporary file (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub version: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub swarm: SwarmConfig,
    pub agents: Vec<WorkflowAgent>,
    pub workflows: Vec<WorkflowDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordination: Option<Coordination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<SharedState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Trajectory>,
}
