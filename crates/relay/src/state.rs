use std::collections::{HashMap, HashSet};

use agent_relay_client::{AgentRuntime, BrokerEvent};
use serde_json::Value;
use tokio::sync::oneshot;

/// Outcome of a facade wait primitive — an expected lifecycle transition,
/// never an error (§7 "Wait-primitive outcomes... modeled as a plain enum").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited,
    Released,
    Idle,
    Timeout,
}

/// Derived lifecycle status (§4.5 "Derived status rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Spawning,
    Ready,
    Idle,
    Exited,
}

/// The facade's view of a named agent (§3 "Agent handle").
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub name: String,
    pub runtime: Option<AgentRuntime>,
    pub channels: Vec<String>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub exit_reason: Option<String>,
}

impl AgentHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: None,
            channels: Vec::new(),
            exit_code: None,
            exit_signal: None,
            exit_reason: None,
        }
    }
}

/// A message observed via `relay_inbound` (§3 "Message").
#[derive(Debug, Clone)]
pub struct Message {
    pub event_id: Option<String>,
    pub from: String,
    pub to: String,
    pub text: String,
    pub thread_id: Option<String>,
    pub data: Option<Value>,
}

/// One of the facade's caller-registered hooks (§4.5's mapping table),
/// unified into a single enum so `on_relay_event` can dispatch all of
/// them through one listener list; the typed `on_agent_*` methods on
/// [`crate::relay::AgentRelay`] are thin filters over this.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    AgentSpawned(AgentHandle),
    AgentReady(AgentHandle),
    WorkerOutput {
        name: String,
        stream: String,
        chunk: String,
    },
    MessageReceived(Message),
    AgentIdle {
        name: String,
        idle_secs: Option<u64>,
    },
    AgentExited(AgentHandle),
    AgentReleased(AgentHandle),
    AgentExitRequested {
        name: String,
        reason: Option<String>,
    },
    WorkerError {
        name: String,
        message: String,
    },
    AgentRestarting {
        name: String,
        attempt: Option<u64>,
    },
    AgentRestarted(AgentHandle),
    AgentPermanentlyDead(AgentHandle),
    DeliveryUpdate(BrokerEvent),
}

type HookListener = std::sync::Arc<dyn Fn(&RelayEvent) + Send + Sync>;
type OutputListener = std::sync::Arc<dyn Fn(&str, &str) + Send + Sync>;

/// All mutable facade state. Guarded by a single `std::sync::Mutex`: every
/// critical section is short and never held across an `.await`, matching
/// the protocol client's own locking discipline (§5 "No locking is
/// required across those").
pub(crate) struct RelayState {
    pub known_agents: HashMap<String, AgentHandle>,
    pub ready: HashSet<String>,
    pub message_ready: HashSet<String>,
    pub exited: HashSet<String>,
    pub idle: HashSet<String>,
    pub exit_resolvers: HashMap<String, Vec<oneshot::Sender<WaitOutcome>>>,
    pub idle_resolvers: HashMap<String, Vec<oneshot::Sender<WaitOutcome>>>,
    /// Per-agent `worker_stream` listeners (§4.5 "output_listeners"),
    /// distinct from the global `on_worker_output` hook: a caller that only
    /// cares about one agent's chunks doesn't have to filter every event.
    pub output_listeners: HashMap<String, Vec<(u64, OutputListener)>>,
    pub hooks: Vec<(u64, HookListener)>,
    pub next_id: u64,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            known_agents: HashMap::new(),
            ready: HashSet::new(),
            message_ready: HashSet::new(),
            exited: HashSet::new(),
            idle: HashSet::new(),
            exit_resolvers: HashMap::new(),
            idle_resolvers: HashMap::new(),
            output_listeners: HashMap::new(),
            hooks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn fire_output(&self, name: &str, stream: &str, chunk: &str) {
        if let Some(listeners) = self.output_listeners.get(name) {
            for (_, listener) in listeners {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(stream, chunk)))
                    .is_err()
                {
                    tracing::warn!("per-agent output listener panicked; continuing to dispatch to remaining listeners");
                }
            }
        }
    }

    pub fn status_of(&self, name: &str) -> AgentStatus {
        if self.exited.contains(name) {
            AgentStatus::Exited
        } else if self.idle.contains(name) {
            AgentStatus::Idle
        } else if self.ready.contains(name) {
            AgentStatus::Ready
        } else {
            AgentStatus::Spawning
        }
    }

    pub fn clear_sets_for(&mut self, name: &str) {
        self.ready.remove(name);
        self.message_ready.remove(name);
        self.exited.remove(name);
        self.idle.remove(name);
    }

    pub fn ensure_handle(&mut self, name: &str) -> &mut AgentHandle {
        self.known_agents
            .entry(name.to_string())
            .or_insert_with(|| AgentHandle::new(name))
    }

    pub fn fire(&self, event: &RelayEvent) {
        for (_, hook) in &self.hooks {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(event))).is_err() {
                tracing::warn!("relay hook panicked; continuing to dispatch to remaining hooks");
            }
        }
    }

    pub fn resolve_exit(&mut self, name: &str, outcome: WaitOutcome) {
        if let Some(resolvers) = self.exit_resolvers.remove(name) {
            for tx in resolvers {
                let _ = tx.send(outcome);
            }
        }
    }

    pub fn resolve_idle(&mut self, name: &str, outcome: WaitOutcome) {
        if let Some(resolvers) = self.idle_resolvers.remove(name) {
            for tx in resolvers {
                let _ = tx.send(outcome);
            }
        }
    }
}
