use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agent_relay_client::requests::{SendMessageRequest, SendMessageResult};
use agent_relay_client::{cli_args, AgentRuntime, AgentSpec, BrokerEvent, ClientOptions, ProtocolClient, Unsubscribe};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::warn;

use crate::agent::Agent;
use crate::error::RelayError;
use crate::state::{AgentHandle, RelayEvent, RelayState, WaitOutcome};

const BROADCAST_SENDER: &str = "human";
const BROADCAST_TARGET: &str = "*";

/// High-level facade over the protocol client (C5): agent handle registry,
/// derived lifecycle state, and wait-for-condition primitives.
pub struct AgentRelay {
    client: Arc<ProtocolClient>,
    state: Arc<StdMutex<RelayState>>,
    wired: AtomicBool,
    client_unsubscribe: StdMutex<Option<Unsubscribe>>,
}

impl AgentRelay {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            client: Arc::new(ProtocolClient::new(options)),
            state: Arc::new(StdMutex::new(RelayState::new())),
            wired: AtomicBool::new(false),
            client_unsubscribe: StdMutex::new(None),
        }
    }

    /// Starts the underlying broker subprocess and wires event dispatch
    /// into the facade's state sets. Idempotent: the event listener is
    /// only ever installed once per instance.
    pub async fn start(&self) -> Result<(), RelayError> {
        self.client.start().await?;

        if !self.wired.swap(true, Ordering::SeqCst) {
            let state = self.state.clone();
            let unsubscribe = self.client.on_event(move |event| dispatch(&state, event));
            *self.client_unsubscribe.lock().unwrap() = Some(unsubscribe);
        }

        Ok(())
    }

    pub fn client(&self) -> &Arc<ProtocolClient> {
        &self.client
    }

    pub fn workspace_key(&self) -> Option<String> {
        self.client.workspace_key()
    }

    pub fn agent(&self, name: impl Into<String>) -> Agent {
        Agent::new(name, self.state.clone())
    }

    pub fn known_agents(&self) -> Vec<AgentHandle> {
        self.state.lock().unwrap().known_agents.values().cloned().collect()
    }

    /// Subscribes to every facade hook uniformly; returns an unsubscribe
    /// thunk (§9 "boxed FnOnce").
    pub fn on_relay_event(&self, listener: impl Fn(&RelayEvent) + Send + Sync + 'static) -> Unsubscribe {
        let id = {
            let mut guard = self.state.lock().unwrap();
            let id = guard.next_id;
            guard.next_id += 1;
            guard.hooks.push((id, Arc::new(listener)));
            id
        };

        let state = self.state.clone();
        Box::new(move || {
            state.lock().unwrap().hooks.retain(|(hid, _)| *hid != id);
        })
    }

    pub fn on_agent_spawned(&self, listener: impl Fn(&AgentHandle) + Send + Sync + 'static) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentSpawned(handle) = event {
                listener(handle);
            }
        })
    }

    pub fn on_agent_ready(&self, listener: impl Fn(&AgentHandle) + Send + Sync + 'static) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentReady(handle) = event {
                listener(handle);
            }
        })
    }

    pub fn on_worker_output(
        &self,
        listener: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::WorkerOutput { name, stream, chunk } = event {
                listener(name, stream, chunk);
            }
        })
    }

    pub fn on_message_received(
        &self,
        listener: impl Fn(&crate::state::Message) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::MessageReceived(message) = event {
                listener(message);
            }
        })
    }

    pub fn on_agent_idle(
        &self,
        listener: impl Fn(&str, Option<u64>) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentIdle { name, idle_secs } = event {
                listener(name, *idle_secs);
            }
        })
    }

    pub fn on_agent_exited(&self, listener: impl Fn(&AgentHandle) + Send + Sync + 'static) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentExited(handle) = event {
                listener(handle);
            }
        })
    }

    pub fn on_agent_released(&self, listener: impl Fn(&AgentHandle) + Send + Sync + 'static) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentReleased(handle) = event {
                listener(handle);
            }
        })
    }

    pub fn on_agent_exit_requested(
        &self,
        listener: impl Fn(&str, Option<&str>) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentExitRequested { name, reason } = event {
                listener(name, reason.as_deref());
            }
        })
    }

    pub fn on_worker_error(
        &self,
        listener: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::WorkerError { name, message } = event {
                listener(name, message);
            }
        })
    }

    pub fn on_agent_restarting(
        &self,
        listener: impl Fn(&str, Option<u64>) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentRestarting { name, attempt } = event {
                listener(name, *attempt);
            }
        })
    }

    pub fn on_agent_restarted(&self, listener: impl Fn(&AgentHandle) + Send + Sync + 'static) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentRestarted(handle) = event {
                listener(handle);
            }
        })
    }

    pub fn on_agent_permanently_dead(
        &self,
        listener: impl Fn(&AgentHandle) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::AgentPermanentlyDead(handle) = event {
                listener(handle);
            }
        })
    }

    pub fn on_delivery_update(&self, listener: impl Fn(&BrokerEvent) + Send + Sync + 'static) -> Unsubscribe {
        self.on_relay_event(move |event| {
            if let RelayEvent::DeliveryUpdate(broker_event) = event {
                listener(broker_event);
            }
        })
    }

    /// Resolves as soon as `name` transitions into `ready`, or immediately
    /// if it already has (§4.5).
    pub async fn wait_for_agent_ready(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<(), RelayError> {
        if self.state.lock().unwrap().ready.contains(name) {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let tx = StdMutex::new(Some(tx));
        let target = name.to_string();
        let unsubscribe = self.on_relay_event(move |event| {
            if let RelayEvent::AgentReady(handle) = event {
                if handle.name == target {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                }
            }
        });

        if self.state.lock().unwrap().ready.contains(name) {
            unsubscribe();
            return Ok(());
        }

        let outcome = await_timeout(rx, timeout).await;
        unsubscribe();

        outcome.ok_or_else(|| RelayError::WaitTimeout {
            name: name.to_string(),
            condition: "ready".to_string(),
        })
    }

    /// Resolves on the first `relay_inbound` from `name`; fails if `name`
    /// exits first without sending anything (§4.5).
    pub async fn wait_for_agent_message(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<(), RelayError> {
        {
            let guard = self.state.lock().unwrap();
            if guard.message_ready.contains(name) {
                return Ok(());
            }
        }

        let (tx, rx) = oneshot::channel::<Result<(), RelayError>>();
        let tx = StdMutex::new(Some(tx));
        let target = name.to_string();
        let unsubscribe = self.on_relay_event(move |event| {
            match event {
                RelayEvent::MessageReceived(message) if message.from == target => {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                RelayEvent::AgentExited(handle) if handle.name == target => {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(Err(RelayError::ExitedBeforeMessage {
                            name: target.clone(),
                        }));
                    }
                }
                _ => {}
            }
        });

        {
            let guard = self.state.lock().unwrap();
            if guard.message_ready.contains(name) {
                unsubscribe();
                return Ok(());
            }
            if guard.exited.contains(name) {
                unsubscribe();
                return Err(RelayError::ExitedBeforeMessage {
                    name: name.to_string(),
                });
            }
        }

        let result = match timeout {
            Some(duration) => time::timeout(duration, rx).await,
            None => Ok(rx.await),
        };
        unsubscribe();

        match result {
            Ok(Ok(inner)) => inner,
            Ok(Err(_)) => Err(RelayError::WaitTimeout {
                name: name.to_string(),
                condition: "first message".to_string(),
            }),
            Err(_) => Err(RelayError::WaitTimeout {
                name: name.to_string(),
                condition: "first message".to_string(),
            }),
        }
    }

    /// Awaits the first of several agents to exit, cancelling the rest
    /// (§4.5 "wait_for_any").
    pub async fn wait_for_any(agents: &[Agent], timeout: Option<Duration>) -> (usize, WaitOutcome) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(agents.len());

        for (index, agent) in agents.iter().enumerate() {
            let agent = agent.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let outcome = agent.wait_for_exit(timeout).await;
                let _ = tx.send((index, outcome));
            }));
        }
        drop(tx);

        let result = rx.recv().await.unwrap_or((0, WaitOutcome::Timeout));
        for handle in handles {
            handle.abort();
        }
        result
    }

    pub async fn spawn_agent(
        &self,
        agent: AgentSpec,
        initial_task: Option<String>,
        idle_threshold_secs: Option<u64>,
        continue_from: Option<String>,
    ) -> Result<Agent, RelayError> {
        let name = agent.name.clone();
        self.client
            .spawn_agent(agent, initial_task, idle_threshold_secs, continue_from)
            .await?;
        Ok(self.agent(name))
    }

    async fn spawn_cli_agent(
        &self,
        cli: &str,
        name: Option<String>,
        args: Vec<String>,
        model: Option<String>,
        initial_task: Option<String>,
    ) -> Result<Agent, RelayError> {
        let name = name.unwrap_or_else(|| default_agent_name(cli));
        let shaped_args = cli_args::build_pty_args_with_model(cli, &args, model.as_deref());

        let mut spec = AgentSpec::new(name.clone());
        spec.runtime = AgentRuntime::Pty;
        spec.cli = Some(cli.to_string());
        spec.args = shaped_args;
        spec.model = model;

        self.spawn_agent(spec, initial_task, None, None).await
    }

    pub async fn spawn_claude(
        &self,
        name: Option<String>,
        args: Vec<String>,
        model: Option<String>,
        initial_task: Option<String>,
    ) -> Result<Agent, RelayError> {
        self.spawn_cli_agent("claude", name, args, model, initial_task).await
    }

    pub async fn spawn_codex(
        &self,
        name: Option<String>,
        args: Vec<String>,
        model: Option<String>,
        initial_task: Option<String>,
    ) -> Result<Agent, RelayError> {
        self.spawn_cli_agent("codex", name, args, model, initial_task).await
    }

    pub async fn spawn_gemini(
        &self,
        name: Option<String>,
        args: Vec<String>,
        model: Option<String>,
        initial_task: Option<String>,
    ) -> Result<Agent, RelayError> {
        self.spawn_cli_agent("gemini", name, args, model, initial_task).await
    }

    /// Spawns an agent, then waits for readiness (or, optionally, for its
    /// first message) before returning the handle.
    pub async fn spawn_and_wait(
        &self,
        agent: AgentSpec,
        initial_task: Option<String>,
        wait_for_message: bool,
        timeout: Option<Duration>,
    ) -> Result<Agent, RelayError> {
        let name = agent.name.clone();
        let handle = self.spawn_agent(agent, initial_task, None, None).await?;

        if wait_for_message {
            self.wait_for_agent_message(&name, timeout).await?;
        } else {
            self.wait_for_agent_ready(&name, timeout).await?;
        }

        Ok(handle)
    }

    /// Sends `text` to every agent (`to = "*"`) from a synthetic human
    /// sender (§4.5 "Broadcast").
    pub async fn broadcast(&self, text: impl Into<String>) -> Result<SendMessageResult, RelayError> {
        let request = SendMessageRequest {
            to: BROADCAST_TARGET.to_string(),
            text: text.into(),
            from: Some(BROADCAST_SENDER.to_string()),
            thread_id: None,
            priority: None,
            data: None,
        };
        self.client.send_message(request).await.map_err(Into::into)
    }

    /// Unsubscribes from the client's event stream, shuts the client down,
    /// resolves every outstanding exit/idle resolver, and clears state
    /// (§4.5 "Shutdown").
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        if let Some(unsubscribe) = self.client_unsubscribe.lock().unwrap().take() {
            unsubscribe();
        }
        self.wired.store(false, Ordering::SeqCst);

        self.client.shutdown().await?;

        let mut guard = self.state.lock().unwrap();
        let names: Vec<String> = guard.exit_resolvers.keys().cloned().collect();
        for name in names {
            guard.resolve_exit(&name, WaitOutcome::Released);
        }
        let names: Vec<String> = guard.idle_resolvers.keys().cloned().collect();
        for name in names {
            guard.resolve_idle(&name, WaitOutcome::Exited);
        }
        guard.known_agents.clear();
        guard.ready.clear();
        guard.message_ready.clear();
        guard.exited.clear();
        guard.idle.clear();
        guard.output_listeners.clear();
        guard.hooks.clear();

        Ok(())
    }
}

async fn await_timeout(rx: oneshot::Receiver<()>, timeout: Option<Duration>) -> Option<()> {
    let result = match timeout {
        Some(duration) => time::timeout(duration, rx).await,
        None => Ok(rx.await),
    };
    match result {
        Ok(Ok(())) => Some(()),
        _ => None,
    }
}

fn default_agent_name(cli: &str) -> String {
    let cli_name = cli.split(':').next().unwrap_or(cli);
    let mut chars = cli_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => cli_name.to_string(),
    }
}

fn dispatch(state: &Arc<StdMutex<RelayState>>, event: &BrokerEvent) {
    match event.kind.as_str() {
        "agent_spawned" => {
            let name = event.name().to_string();
            let mut guard = state.lock().unwrap();
            guard.clear_sets_for(&name);
            let handle = AgentHandle::new(&name);
            guard.known_agents.insert(name, handle.clone());
            guard.fire(&RelayEvent::AgentSpawned(handle));
        }
        "worker_ready" => {
            let name = event.name().to_string();
            let mut guard = state.lock().unwrap();
            guard.ensure_handle(&name);
            guard.ready.insert(name.clone());
            guard.exited.remove(&name);
            guard.idle.remove(&name);
            let handle = guard.known_agents.get(&name).cloned().unwrap();
            guard.fire(&RelayEvent::AgentReady(handle));
        }
        "worker_stream" => {
            let name = event.name().to_string();
            let stream = event.str_field("stream").unwrap_or("").to_string();
            let chunk = event.str_field("chunk").unwrap_or("").to_string();
            let mut guard = state.lock().unwrap();
            guard.idle.remove(&name);
            guard.fire_output(&name, &stream, &chunk);
            guard.fire(&RelayEvent::WorkerOutput { name, stream, chunk });
        }
        "relay_inbound" => {
            let from = event.from_field().to_string();
            let to = event.str_field("to").unwrap_or("").to_string();
            let text = event.str_field("text").unwrap_or("").to_string();
            let event_id = event.str_field("event_id").map(ToString::to_string);
            let thread_id = event.str_field("thread_id").map(ToString::to_string);
            let data = event.fields.get("data").cloned();

            let mut guard = state.lock().unwrap();
            if guard.known_agents.contains_key(&from) {
                guard.message_ready.insert(from.clone());
                guard.exited.remove(&from);
            }
            guard.fire(&RelayEvent::MessageReceived(crate::state::Message {
                event_id,
                from,
                to,
                text,
                thread_id,
                data,
            }));
        }
        "agent_idle" => {
            let name = event.name().to_string();
            let idle_secs = event.u64_field("idle_secs");
            let mut guard = state.lock().unwrap();
            guard.idle.insert(name.clone());
            guard.resolve_idle(&name, WaitOutcome::Idle);
            guard.fire(&RelayEvent::AgentIdle { name, idle_secs });
        }
        "agent_exited" => finish_agent(state, event, WaitOutcome::Exited, true),
        "agent_released" => finish_agent(state, event, WaitOutcome::Released, false),
        "agent_exit" => {
            let name = event.name().to_string();
            let reason = event.str_field("reason").map(ToString::to_string);
            let mut guard = state.lock().unwrap();
            if let Some(handle) = guard.known_agents.get_mut(&name) {
                handle.exit_reason = reason.clone();
            }
            guard.fire(&RelayEvent::AgentExitRequested { name, reason });
        }
        "worker_error" => {
            let name = event.name().to_string();
            let message = event.str_field("message").unwrap_or("").to_string();
            let mut guard = state.lock().unwrap();
            guard.ensure_handle(&name);
            guard.fire(&RelayEvent::WorkerError { name, message });
        }
        "agent_restarting" => {
            let name = event.name().to_string();
            let attempt = event.u64_field("attempt");
            let mut guard = state.lock().unwrap();
            guard.clear_sets_for(&name);
            guard.ensure_handle(&name);
            guard.fire(&RelayEvent::AgentRestarting { name, attempt });
        }
        "agent_restarted" => {
            let name = event.name().to_string();
            let mut guard = state.lock().unwrap();
            guard.ensure_handle(&name);
            guard.ready.insert(name.clone());
            guard.exited.remove(&name);
            guard.idle.remove(&name);
            let handle = guard.known_agents.get(&name).cloned().unwrap();
            guard.fire(&RelayEvent::AgentRestarted(handle));
        }
        "agent_permanently_dead" => {
            let name = event.name().to_string();
            let mut guard = state.lock().unwrap();
            if let Some(handle) = guard.known_agents.get_mut(&name) {
                handle.exit_reason = event.str_field("reason").map(ToString::to_string);
            }
            guard.exited.insert(name.clone());
            guard.ready.remove(&name);
            guard.message_ready.remove(&name);
            guard.idle.remove(&name);
            guard.resolve_exit(&name, WaitOutcome::Exited);
            guard.resolve_idle(&name, WaitOutcome::Exited);
            guard.output_listeners.remove(&name);
            if let Some(handle) = guard.known_agents.remove(&name) {
                guard.fire(&RelayEvent::AgentPermanentlyDead(handle));
            }
        }
        kind if is_delivery_kind(kind) => {
            state.lock().unwrap().fire(&RelayEvent::DeliveryUpdate(event.clone()));
        }
        other => {
            warn!(kind = other, "unrecognized broker event kind; ignoring");
        }
    }
}

fn finish_agent(state: &Arc<StdMutex<RelayState>>, event: &BrokerEvent, outcome: WaitOutcome, is_exit: bool) {
    let name = event.name().to_string();
    let mut guard = state.lock().unwrap();

    if let Some(handle) = guard.known_agents.get_mut(&name) {
        handle.exit_code = event.i64_field("exit_code").map(|v| v as i32);
        handle.exit_signal = event.str_field("exit_signal").map(ToString::to_string);
        handle.exit_reason = event.str_field("reason").map(ToString::to_string);
    }

    guard.exited.insert(name.clone());
    guard.ready.remove(&name);
    guard.message_ready.remove(&name);
    guard.idle.remove(&name);
    guard.resolve_exit(&name, outcome);
    guard.resolve_idle(&name, WaitOutcome::Exited);

    guard.output_listeners.remove(&name);

    let removed = guard.known_agents.remove(&name);
    if let Some(handle) = removed {
        if is_exit {
            guard.fire(&RelayEvent::AgentExited(handle));
        } else {
            guard.fire(&RelayEvent::AgentReleased(handle));
        }
    }
}

fn is_delivery_kind(kind: &str) -> bool {
    kind.starts_with("delivery_")
        || matches!(kind, "relaycast_published" | "relaycast_publish_failed" | "acl_denied")
}
