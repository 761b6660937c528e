use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agent_relay_client::Unsubscribe;
use tokio::sync::oneshot;
use tokio::time;

use crate::state::{AgentHandle, AgentStatus, RelayState, WaitOutcome};

/// A handle to a single named agent, obtained from [`crate::AgentRelay`].
///
/// Holds an `Arc` clone of the facade's shared state rather than a
/// back-reference to the owning `AgentRelay` (§9 "Cyclic references") —
/// the two-way relation between facade and handle doesn't need a literal
/// cycle to express in Rust.
#[derive(Clone)]
pub struct Agent {
    name: String,
    state: Arc<StdMutex<RelayState>>,
}

impl Agent {
    pub(crate) fn new(name: impl Into<String>, state: Arc<StdMutex<RelayState>>) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current derived status, or `None` if the agent is no longer known
    /// to the facade (it already exited and was reaped).
    pub fn status(&self) -> Option<AgentStatus> {
        let guard = self.state.lock().unwrap();
        if guard.known_agents.contains_key(&self.name) {
            Some(guard.status_of(&self.name))
        } else {
            None
        }
    }

    pub fn handle(&self) -> Option<AgentHandle> {
        self.state.lock().unwrap().known_agents.get(&self.name).cloned()
    }

    /// Subscribes to this agent's `worker_stream` chunks only (§4.5
    /// "output_listeners: per-agent callback lists"). Returns an
    /// unsubscribe thunk; listeners are also dropped wholesale once the
    /// agent exits or is released.
    pub fn on_output(&self, listener: impl Fn(&str, &str) + Send + Sync + 'static) -> Unsubscribe {
        let id = {
            let mut guard = self.state.lock().unwrap();
            let id = guard.next_id;
            guard.next_id += 1;
            guard
                .output_listeners
                .entry(self.name.clone())
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        let state = self.state.clone();
        let name = self.name.clone();
        Box::new(move || {
            if let Some(listeners) = state.lock().unwrap().output_listeners.get_mut(&name) {
                listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Awaits the agent's exit. Resolves immediately with `Exited` if the
    /// agent is already gone from the registry (§4.5 "Agent.wait_for_exit").
    pub async fn wait_for_exit(&self, timeout: Option<Duration>) -> WaitOutcome {
        {
            let guard = self.state.lock().unwrap();
            if !guard.known_agents.contains_key(&self.name) {
                return WaitOutcome::Exited;
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.state.lock().unwrap();
            guard
                .exit_resolvers
                .entry(self.name.clone())
                .or_default()
                .push(tx);
        }

        await_outcome(rx, timeout).await
    }

    /// Awaits the agent's next idle transition; resolves `Exited` if the
    /// agent goes away first, or `Timeout` (§4.5 "Agent.wait_for_idle").
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> WaitOutcome {
        {
            let guard = self.state.lock().unwrap();
            if !guard.known_agents.contains_key(&self.name) {
                return WaitOutcome::Exited;
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.state.lock().unwrap();
            guard
                .idle_resolvers
                .entry(self.name.clone())
                .or_default()
                .push(tx);
        }

        await_outcome(rx, timeout).await
    }
}

async fn await_outcome(rx: oneshot::Receiver<WaitOutcome>, timeout: Option<Duration>) -> WaitOutcome {
    let result = match timeout {
        Some(duration) => time::timeout(duration, rx).await,
        None => Ok(rx.await),
    };

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => WaitOutcome::Timeout,
        Err(_) => WaitOutcome::Timeout,
    }
}
