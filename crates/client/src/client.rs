use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agent_relay_lines::{AsyncLineIngestor, IngestLimits};
use agent_relay_protocol::{AgentRuntime, AgentSpec, BrokerEvent, Envelope};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::binary;
use crate::error::ClientError;
use crate::line_parser::{EnvelopeLineParser, PlainTextLineParser};
use crate::options::ClientOptions;
use crate::requests::{
    PreflightAgentsRequest, ProtocolErrorPayload, ReleaseAgentRequest, SendInputRequest,
    SendMessageRequest, SendMessageResult, SetModelRequest, SpawnAgentRequest, SpawnAgentResult,
    UNSUPPORTED_OPERATION,
};

/// Outcome of [`ProtocolClient::wait_for_exit`] — the broker process has
/// exited, carrying its exit code when the platform reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

/// Returned by `on_event`/`on_broker_stderr`; call it once to remove the
/// listener. Explicit, not RAII — callers routinely want a listener to
/// outlive the scope where they captured the unsubscribe handle.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

type EventListener = Arc<dyn Fn(&BrokerEvent) + Send + Sync>;
type StderrListener = Arc<dyn Fn(&str) + Send + Sync>;

struct PendingSlot {
    expected_type: String,
    tx: oneshot::Sender<Result<Envelope, ClientError>>,
}

struct ClientState {
    pending: HashMap<String, PendingSlot>,
    events: VecDeque<BrokerEvent>,
    event_cap: usize,
    event_listeners: Vec<(u64, EventListener)>,
    stderr_listeners: Vec<(u64, StderrListener)>,
    next_listener_id: u64,
    last_stderr_line: Option<String>,
    workspace_key: Option<String>,
}

impl ClientState {
    fn new(event_cap: usize) -> Self {
        Self {
            pending: HashMap::new(),
            events: VecDeque::new(),
            event_cap,
            event_listeners: Vec::new(),
            stderr_listeners: Vec::new(),
            next_listener_id: 0,
            last_stderr_line: None,
            workspace_key: None,
        }
    }
}

/// Control message sent to the exit-monitor task to escalate shutdown.
///
/// Both variants resolve to the same underlying call: `tokio::process`
/// doesn't expose a portable graceful-terminate distinct from a hard
/// kill, so the request -> terminate -> kill escalation in §4.4 collapses
/// its last two stages onto `Child::start_kill` while keeping the
/// two-stage timeout structure intact (see DESIGN.md).
enum ChildControl {
    Terminate,
    Kill,
}

/// Async protocol client (C4): owns the broker subprocess, speaks the
/// envelope protocol over its stdio, and exposes typed request wrappers
/// plus event/stderr subscriptions.
pub struct ProtocolClient {
    options: ClientOptions,
    state: Arc<StdMutex<ClientState>>,
    next_seq: AtomicU64,
    stdin_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<String>>>>,
    control_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<ChildControl>>>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    started: Arc<AtomicBool>,
    start_lock: AsyncMutex<()>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
}

impl ProtocolClient {
    pub fn new(options: ClientOptions) -> Self {
        let (exit_tx, _exit_rx) = watch::channel(None);
        Self {
            state: Arc::new(StdMutex::new(ClientState::new(options.event_history_cap))),
            next_seq: AtomicU64::new(1),
            stdin_tx: Arc::new(StdMutex::new(None)),
            control_tx: Arc::new(StdMutex::new(None)),
            tasks: Arc::new(StdMutex::new(Vec::new())),
            started: Arc::new(AtomicBool::new(false)),
            start_lock: AsyncMutex::new(()),
            exit_tx,
            options,
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn workspace_key(&self) -> Option<String> {
        self.state.lock().unwrap().workspace_key.clone()
    }

    /// Starts the broker subprocess and completes the `hello` handshake.
    /// Idempotent and safe to call concurrently: a second caller observing
    /// `started` already set short-circuits (§4.4 "Startup").
    pub async fn start(&self) -> Result<(), ClientError> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.start_lock.lock().await;
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (binary_path, is_explicit) = self.resolve_binary()?;
        let command = self.build_command(&binary_path, is_explicit);
        let mut child = spawn_with_retry(command, &binary_path).await?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe(&binary_path, "stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe(&binary_path, "stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe(&binary_path, "stderr"))?;

        {
            let mut state = self.state.lock().unwrap();
            state.pending.clear();
            state.events.clear();
            state.last_stderr_line = None;
            state.workspace_key = None;
        }

        let limits = IngestLimits {
            max_line_bytes: self.options.max_line_bytes,
        };

        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<String>();
        let writer_handle = tokio::spawn(writer_task(stdin, writer_rx));

        let reader_handle = tokio::spawn(reader_task(stdout, self.state.clone(), limits));
        let stderr_handle = tokio::spawn(stderr_task(stderr, self.state.clone(), limits));

        let (control_tx, control_rx) = mpsc::unbounded_channel::<ChildControl>();
        let exit_handle = tokio::spawn(exit_monitor_task(
            child,
            control_rx,
            self.state.clone(),
            self.exit_tx.clone(),
            self.started.clone(),
        ));

        *self.stdin_tx.lock().unwrap() = Some(writer_tx);
        *self.control_tx.lock().unwrap() = Some(control_tx);
        *self.tasks.lock().unwrap() = vec![writer_handle, reader_handle, stderr_handle, exit_handle];
        self.started.store(true, Ordering::SeqCst);

        let hello_payload = serde_json::json!({
            "client_name": self.options.client_name,
            "client_version": self.options.client_version,
        });

        match self.send_request("hello", hello_payload, "hello_ack").await {
            Ok(envelope) => {
                if let Some(key) = envelope.payload.get("workspace_key").and_then(Value::as_str) {
                    self.state.lock().unwrap().workspace_key = Some(key.to_string());
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "broker hello handshake failed; tearing down subprocess");
                self.cleanup_after_exit();
                Err(err)
            }
        }
    }

    fn resolve_binary(&self) -> Result<(String, bool), ClientError> {
        match &self.options.binary_path {
            Some(raw) => {
                let is_explicit = binary::is_explicit_path(raw);
                let expanded = binary::expand_tilde(raw);
                if is_explicit && !Path::new(&expanded).exists() {
                    return Err(ClientError::BinaryNotFound { binary: expanded });
                }
                Ok((expanded, is_explicit))
            }
            None => Ok((binary::resolve_default_binary_path(), false)),
        }
    }

    fn build_command(&self, binary_path: &str, is_explicit: bool) -> Command {
        let broker_name = self
            .options
            .broker_name
            .clone()
            .unwrap_or_else(|| "agent-relay".to_string());
        let channels = if self.options.channels.is_empty() {
            vec!["general".to_string()]
        } else {
            self.options.channels.clone()
        };

        let mut argv = vec![
            "init".to_string(),
            "--name".to_string(),
            broker_name,
            "--channels".to_string(),
            channels.join(","),
        ];
        argv.extend(self.options.binary_args.iter().cloned());

        let mut command = Command::new(binary_path);
        command
            .args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.options.cwd {
            command.current_dir(cwd);
        }

        match &self.options.env {
            Some(env) => {
                command.env_clear();
                for (k, v) in env {
                    command.env(k, v);
                }
                if is_explicit {
                    if let Some(dir) = binary::parent_dir(binary_path) {
                        if let Some(new_path) =
                            binary::prepend_to_path(env.get("PATH").map(String::as_str), &dir)
                        {
                            command.env("PATH", new_path);
                        }
                    }
                }
            }
            None if is_explicit => {
                if let Some(dir) = binary::parent_dir(binary_path) {
                    let current = std::env::var("PATH").ok();
                    if let Some(new_path) = binary::prepend_to_path(current.as_deref(), &dir) {
                        command.env("PATH", new_path);
                    }
                }
            }
            None => {}
        }

        command
    }

    /// Sends the `shutdown` request (best-effort), then escalates through
    /// terminate/kill on a bounded timeout (§4.4 "Shutdown"). Safe to call
    /// repeatedly and when the client never started.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self
            .send_request("shutdown", serde_json::json!({}), "ok")
            .await;

        if time::timeout(self.options.shutdown_timeout, self.wait_for_exit())
            .await
            .is_err()
        {
            self.signal_child(ChildControl::Terminate);
            if time::timeout(Duration::from_secs(2), self.wait_for_exit())
                .await
                .is_err()
            {
                self.signal_child(ChildControl::Kill);
                let _ = self.wait_for_exit().await;
            }
        }

        self.cleanup_after_exit();
        Ok(())
    }

    fn signal_child(&self, cmd: ChildControl) {
        let sender = self.control_tx.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(cmd);
        }
    }

    fn cleanup_after_exit(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        *self.stdin_tx.lock().unwrap() = None;
        *self.control_tx.lock().unwrap() = None;
        {
            let mut state = self.state.lock().unwrap();
            for (_, slot) in state.pending.drain() {
                let _ = slot.tx.send(Err(ClientError::NotRunning));
            }
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Awaits the broker subprocess's exit. Resolves immediately if it has
    /// already exited.
    pub async fn wait_for_exit(&self) -> ExitOutcome {
        if let Some(outcome) = *self.exit_tx.borrow() {
            return outcome;
        }
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(outcome) = *rx.borrow_and_update() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return ExitOutcome { code: None };
            }
        }
    }

    /// Subscribes to broker events; returns an unsubscribe thunk.
    pub fn on_event(&self, listener: impl Fn(&BrokerEvent) + Send + Sync + 'static) -> Unsubscribe {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.event_listeners.push((id, Arc::new(listener)));
            id
        };

        let state = self.state.clone();
        Box::new(move || {
            state
                .lock()
                .unwrap()
                .event_listeners
                .retain(|(lid, _)| *lid != id);
        })
    }

    /// Subscribes to non-empty broker stderr lines; returns an unsubscribe
    /// thunk.
    pub fn on_broker_stderr(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> Unsubscribe {
        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.stderr_listeners.push((id, Arc::new(listener)));
            id
        };

        let state = self.state.clone();
        Box::new(move || {
            state
                .lock()
                .unwrap()
                .stderr_listeners
                .retain(|(lid, _)| *lid != id);
        })
    }

    /// Returns events from the bounded in-memory ring buffer, most recent
    /// first filtered then truncated to `limit`, preserving chronological
    /// order within the returned slice.
    pub fn query_events(
        &self,
        kind: Option<&str>,
        name: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<BrokerEvent> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<BrokerEvent> = state
            .events
            .iter()
            .filter(|event| kind.map_or(true, |k| event.kind == k))
            .filter(|event| name.map_or(true, |n| event.name() == n))
            .cloned()
            .collect();

        if let Some(limit) = limit {
            if matching.len() > limit {
                let drop_from_front = matching.len() - limit;
                matching.drain(0..drop_from_front);
            }
        }

        matching
    }

    async fn send_request(
        &self,
        kind: &str,
        payload: Value,
        expected_type: &str,
    ) -> Result<Envelope, ClientError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ClientError::NotRunning);
        }

        let request_id = format!("req_{}", self.next_seq.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().unwrap();
            state.pending.insert(
                request_id.clone(),
                PendingSlot {
                    expected_type: expected_type.to_string(),
                    tx,
                },
            );
        }

        let envelope = Envelope::request(kind, payload, request_id.clone());
        let line = match envelope.to_line() {
            Ok(line) => line,
            Err(err) => {
                self.remove_pending(&request_id);
                return Err(ClientError::Serialize(err.to_string()));
            }
        };

        let sender = self.stdin_tx.lock().unwrap().clone();
        let Some(sender) = sender else {
            self.remove_pending(&request_id);
            return Err(ClientError::NotRunning);
        };
        if sender.send(line).is_err() {
            self.remove_pending(&request_id);
            return Err(ClientError::NotRunning);
        }

        match time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Err(_) => {
                self.remove_pending(&request_id);
                Err(ClientError::Timeout {
                    timeout: self.options.request_timeout,
                    request_type: kind.to_string(),
                    request_id,
                })
            }
        }
    }

    fn remove_pending(&self, request_id: &str) {
        self.state.lock().unwrap().pending.remove(request_id);
    }

    async fn request_result<T: DeserializeOwned>(
        &self,
        kind: &str,
        payload: Value,
    ) -> Result<T, ClientError> {
        let envelope = self.send_request(kind, payload, "ok").await?;
        let result = envelope
            .payload
            .get("result")
            .cloned()
            .unwrap_or(envelope.payload);
        serde_json::from_value(result).map_err(|err| ClientError::Deserialize(err.to_string()))
    }

    pub async fn spawn_agent(
        &self,
        agent: AgentSpec,
        initial_task: Option<String>,
        idle_threshold_secs: Option<u64>,
        continue_from: Option<String>,
    ) -> Result<SpawnAgentResult, ClientError> {
        let payload = SpawnAgentRequest {
            agent,
            initial_task,
            idle_threshold_secs,
            continue_from,
        };
        let value =
            serde_json::to_value(&payload).map_err(|err| ClientError::Serialize(err.to_string()))?;
        self.request_result("spawn_agent", value).await
    }

    pub async fn spawn_pty_agent(
        &self,
        mut agent: AgentSpec,
        initial_task: Option<String>,
        idle_threshold_secs: Option<u64>,
        continue_from: Option<String>,
    ) -> Result<SpawnAgentResult, ClientError> {
        agent.runtime = AgentRuntime::Pty;
        self.spawn_agent(agent, initial_task, idle_threshold_secs, continue_from)
            .await
    }

    pub async fn spawn_headless_agent(
        &self,
        mut agent: AgentSpec,
        initial_task: Option<String>,
        idle_threshold_secs: Option<u64>,
        continue_from: Option<String>,
    ) -> Result<SpawnAgentResult, ClientError> {
        agent.runtime = AgentRuntime::HeadlessClaude;
        self.spawn_agent(agent, initial_task, idle_threshold_secs, continue_from)
            .await
    }

    pub async fn release_agent(&self, name: impl Into<String>) -> Result<Value, ClientError> {
        let payload = serde_json::to_value(ReleaseAgentRequest { name: name.into() })
            .map_err(|err| ClientError::Serialize(err.to_string()))?;
        self.request_result("release_agent", payload).await
    }

    pub async fn send_input(
        &self,
        name: impl Into<String>,
        input: impl Into<String>,
    ) -> Result<Value, ClientError> {
        let payload = serde_json::to_value(SendInputRequest {
            name: name.into(),
            input: input.into(),
        })
        .map_err(|err| ClientError::Serialize(err.to_string()))?;
        self.request_result("send_input", payload).await
    }

    pub async fn set_model(
        &self,
        name: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Value, ClientError> {
        let payload = serde_json::to_value(SetModelRequest {
            name: name.into(),
            model: model.into(),
        })
        .map_err(|err| ClientError::Serialize(err.to_string()))?;
        self.request_result("set_model", payload).await
    }

    /// Sends a message, folding the broker's `unsupported_operation`
    /// protocol error into a benign synthetic result rather than
    /// propagating it (§4.4 "Send-message fallback").
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendMessageResult, ClientError> {
        let payload = serde_json::to_value(&request)
            .map_err(|err| ClientError::Serialize(err.to_string()))?;
        match self
            .request_result::<SendMessageResult>("send_message", payload)
            .await
        {
            Ok(result) => Ok(result),
            Err(ClientError::Protocol { code, .. }) if code == UNSUPPORTED_OPERATION => {
                Ok(SendMessageResult::unsupported())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn list_agents(&self) -> Result<Value, ClientError> {
        self.request_result("list_agents", serde_json::json!({})).await
    }

    pub async fn get_status(&self) -> Result<Value, ClientError> {
        self.request_result("get_status", serde_json::json!({})).await
    }

    pub async fn get_metrics(&self) -> Result<Value, ClientError> {
        self.request_result("get_metrics", serde_json::json!({})).await
    }

    pub async fn get_crash_insights(&self) -> Result<Value, ClientError> {
        self.request_result("get_crash_insights", serde_json::json!({}))
            .await
    }

    pub async fn preflight_agents(&self, agents: Vec<AgentSpec>) -> Result<Value, ClientError> {
        let payload = serde_json::to_value(PreflightAgentsRequest { agents })
            .map_err(|err| ClientError::Serialize(err.to_string()))?;
        self.request_result("preflight_agents", payload).await
    }
}

fn missing_pipe(binary: &str, which: &'static str) -> ClientError {
    ClientError::Spawn {
        binary: binary.to_string(),
        source: Arc::new(io::Error::new(
            io::ErrorKind::Other,
            format!("child {which} pipe unavailable"),
        )),
    }
}

async fn spawn_with_retry(mut command: Command, binary_path: &str) -> Result<Child, ClientError> {
    let mut backoff = Duration::from_millis(2);
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && backoff <= Duration::from_millis(32) {
                    time::sleep(backoff).await;
                    backoff *= 2;
                    continue;
                }
                return Err(ClientError::Spawn {
                    binary: binary_path.to_string(),
                    source: Arc::new(source),
                });
            }
        }
    }
}

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    use tokio::io::AsyncWriteExt;

    while let Some(line) = rx.recv().await {
        if stdin.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(stdout: ChildStdout, state: Arc<StdMutex<ClientState>>, limits: IngestLimits) {
    let mut ingestor = AsyncLineIngestor::new(stdout, limits, EnvelopeLineParser);

    while let Some(ingested) = ingestor.next_line().await {
        let envelope = match ingested.outcome {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(err) => {
                debug!(error = %err, "dropped malformed line from broker stdout");
                continue;
            }
        };

        if envelope.is_event() {
            handle_event_envelope(envelope, &state);
        } else {
            handle_response_envelope(envelope, &state);
        }
    }
}

fn handle_event_envelope(envelope: Envelope, state: &Arc<StdMutex<ClientState>>) {
    let Ok(event) = serde_json::from_value::<BrokerEvent>(envelope.payload) else {
        return;
    };

    let listeners = {
        let mut guard = state.lock().unwrap();
        guard.events.push_back(event.clone());
        while guard.events.len() > guard.event_cap {
            guard.events.pop_front();
        }
        guard
            .event_listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>()
    };

    for listener in listeners {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&event))).is_err() {
            warn!("event listener panicked; continuing to dispatch to remaining listeners");
        }
    }
}

fn handle_response_envelope(envelope: Envelope, state: &Arc<StdMutex<ClientState>>) {
    let Some(request_id) = envelope.request_id.clone() else {
        return;
    };

    let slot = state.lock().unwrap().pending.remove(&request_id);
    let Some(slot) = slot else {
        return;
    };

    let result = if envelope.is_error() {
        match serde_json::from_value::<ProtocolErrorPayload>(envelope.payload) {
            Ok(err) => Err(ClientError::Protocol {
                code: err.code,
                message: err.message,
                retryable: err.retryable,
                data: err.data,
            }),
            Err(err) => Err(ClientError::Deserialize(err.to_string())),
        }
    } else if envelope.kind == slot.expected_type {
        Ok(envelope)
    } else {
        Err(ClientError::UnexpectedResponseType {
            request_id: request_id.clone(),
            expected: slot.expected_type.clone(),
            actual: envelope.kind.clone(),
        })
    };

    let _ = slot.tx.send(result);
}

async fn stderr_task(stderr: ChildStderr, state: Arc<StdMutex<ClientState>>, limits: IngestLimits) {
    let mut ingestor = AsyncLineIngestor::new(stderr, limits, PlainTextLineParser);

    while let Some(ingested) = ingestor.next_line().await {
        let line = match ingested.outcome {
            Ok(Some(line)) => line,
            _ => continue,
        };
        if line.trim().is_empty() {
            continue;
        }

        let listeners = {
            let mut guard = state.lock().unwrap();
            guard.last_stderr_line = Some(line.clone());
            guard
                .stderr_listeners
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect::<Vec<_>>()
        };

        for listener in listeners {
            let line_ref = line.as_str();
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(line_ref))).is_err()
            {
                warn!("stderr listener panicked; continuing to dispatch to remaining listeners");
            }
        }
    }
}

async fn exit_monitor_task(
    mut child: Child,
    mut control_rx: mpsc::UnboundedReceiver<ChildControl>,
    state: Arc<StdMutex<ClientState>>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    started: Arc<AtomicBool>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            cmd = control_rx.recv() => {
                match cmd {
                    Some(ChildControl::Terminate) | Some(ChildControl::Kill) => {
                        let _ = child.start_kill();
                    }
                    None => {}
                }
            }
        }
    };

    let code = status.ok().and_then(|status| status.code());

    {
        let mut guard = state.lock().unwrap();
        let last_stderr_line = guard.last_stderr_line.clone();
        let error = ClientError::ProcessExited {
            code,
            last_stderr_line,
        };
        for (_, slot) in guard.pending.drain() {
            let _ = slot.tx.send(Err(error.clone()));
        }
    }

    started.store(false, Ordering::SeqCst);
    let _ = exit_tx.send(Some(ExitOutcome { code }));
}
