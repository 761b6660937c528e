use serde::{Deserialize, Serialize};

/// The runtime a spawned agent executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRuntime {
    Pty,
    HeadlessClaude,
}

impl Default for AgentRuntime {
    fn default() -> Self {
        AgentRuntime::Pty
    }
}

/// Restart policy for an agent the broker should keep alive across crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_restarts: u32,
    pub cooldown_ms: u64,
    pub max_consecutive_failures: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_restarts: 3,
            cooldown_ms: 1000,
            max_consecutive_failures: 3,
        }
    }
}

/// Specification for spawning an agent, carried in a `spawn_agent` request.
///
/// Fields set to their "empty" value (`None`, `[]`) are omitted from the
/// wire payload rather than serialized as `null`/`[]`, matching the
/// reference implementation's `to_dict()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub runtime: AgentRuntime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: AgentRuntime::Pty,
            cli: None,
            args: Vec::new(),
            channels: Vec::new(),
            model: None,
            cwd: None,
            team: None,
            shadow_of: None,
            shadow_mode: None,
            restart_policy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omits_empty_optional_fields() {
        let spec = AgentSpec::new("Analyst");
        let value = serde_json::to_value(&spec).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("cli"));
        assert!(!object.contains_key("args"));
        assert!(!object.contains_key("channels"));
        assert!(!object.contains_key("model"));
        assert_eq!(object.get("runtime").unwrap(), "pty");
    }

    #[test]
    fn serializes_restart_policy_when_present() {
        let mut spec = AgentSpec::new("Analyst");
        spec.restart_policy = Some(RestartPolicy::default());
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["restart_policy"]["max_restarts"], 3);
    }
}
