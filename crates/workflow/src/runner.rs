use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use agent_relay_lines::{AsyncLineIngestor, IngestLimits};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{info, warn};

use crate::config::{Trajectory, TrajectoryOptions, WorkflowDocument};
use crate::error::WorkflowError;
use crate::line_parser::{RunStatus, RunnerLine, RunnerLineParser, StepStatus};

/// Callback invoked once per typed event as the run progresses.
pub type WorkflowEventListener = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Runtime overrides and invocation options for [`WorkflowRunner::run`]
/// (§4.7).
#[derive(Clone, Default)]
pub struct WorkflowRunOptions {
    /// Explicit runner binary; otherwise resolved via PATH / `npx` fallback.
    pub runner_binary: Option<String>,
    pub workflow_name: Option<String>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
    /// `{{var}}` substitution values, keyed by placeholder name.
    pub variables: HashMap<String, String>,
    /// Overrides the document's trajectory toggle without touching its
    /// other fields.
    pub trajectory_enabled: Option<bool>,
    pub timeout: Option<Duration>,
    pub on_event: Option<WorkflowEventListener>,
}

impl std::fmt::Debug for WorkflowRunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunOptions")
            .field("runner_binary", &self.runner_binary)
            .field("workflow_name", &self.workflow_name)
            .field("cwd", &self.cwd)
            .field("variables", &self.variables)
            .field("trajectory_enabled", &self.trajectory_enabled)
            .field("timeout", &self.timeout)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// One typed progress event parsed from the runner's output (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    RunStarted,
    RunCompleted,
    RunFailed { detail: Option<String> },
    RunCancelled,
    StepStarted { name: String },
    StepCompleted { name: String },
    StepFailed { name: String, detail: Option<String> },
    StepSkipped { name: String },
    StepRetrying { name: String },
    StepNudged { name: String },
    StepForceReleased { name: String },
}

/// Per-step result accumulated across the run (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    pub status: String,
    pub error: Option<String>,
    pub output: Option<String>,
}

/// The final aggregated outcome of a workflow run (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowResult {
    pub status: String,
    pub run_id: Option<String>,
    pub error: Option<String>,
    pub events: Vec<WorkflowEvent>,
    pub steps: Vec<StepResult>,
}

/// Invokes the external workflow runner and stream-parses its progress
/// output (C7).
pub struct WorkflowRunner;

impl WorkflowRunner {
    /// Applies runtime overrides, writes the configuration to a temporary
    /// file, invokes the runner, and aggregates its output into a
    /// [`WorkflowResult`]. The temporary file is always removed.
    pub async fn run(
        document: &WorkflowDocument,
        options: WorkflowRunOptions,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut document = document.clone();
        apply_variable_substitution(&mut document, &options.variables);
        if let Some(enabled) = options.trajectory_enabled {
            apply_trajectory_toggle(&mut document, enabled);
        }

        let yaml = serde_yaml::to_string(&document).map_err(WorkflowError::Serialize)?;

        let temp_file = tempfile::Builder::new()
            .prefix("agent-relay-workflow-")
            .suffix(".yaml")
            .tempfile()
            .map_err(|source| WorkflowError::WriteConfig {
                path: "<tempfile>".to_string(),
                source,
            })?;
        std::fs::write(temp_file.path(), &yaml).map_err(|source| WorkflowError::WriteConfig {
            path: temp_file.path().display().to_string(),
            source,
        })?;

        let run_future = Self::invoke(temp_file.path(), &options);
        let result = match options.timeout {
            Some(duration) => time::timeout(duration, run_future)
                .await
                .map_err(|_| WorkflowError::Timeout(duration))?,
            None => run_future.await,
        };

        // `temp_file` drops here regardless of the branch taken above,
        // deleting the backing file.
        result
    }

    async fn invoke(
        config_path: &Path,
        options: &WorkflowRunOptions,
    ) -> Result<WorkflowResult, WorkflowError> {
        let (program, mut argv) = resolve_runner_invocation(options)?;
        argv.push("run".to_string());
        argv.push(config_path.display().to_string());
        if let Some(name) = &options.workflow_name {
            argv.push("--workflow".to_string());
            argv.push(name.clone());
        }

        info!(binary = %program, "starting workflow run");

        let mut command = Command::new(&program);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &options.env {
            command.env_clear();
            for (key, value) in env {
                command.env(key, value);
            }
        }

        let mut child = command.spawn().map_err(|source| WorkflowError::Spawn {
            binary: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");

        let (tx, mut rx) = mpsc::unbounded_channel::<LineRecord>();
        let stdout_task = tokio::spawn(ingest_loop(stdout, tx.clone()));
        let stderr_task = tokio::spawn(ingest_loop(stderr, tx.clone()));
        drop(tx);

        let mut aggregator = Aggregator::default();
        while let Some(record) = rx.recv().await {
            aggregator.ingest(record, options.on_event.as_ref());
        }

        stdout_task.await.map_err(WorkflowError::Join)?;
        stderr_task.await.map_err(WorkflowError::Join)?;

        let status = child.wait().await.map_err(WorkflowError::RunnerIo)?;
        Ok(aggregator.finish(status.code()))
    }
}

fn apply_variable_substitution(document: &mut WorkflowDocument, variables: &HashMap<String, String>) {
    let mut value = match serde_json::to_value(&*document) {
        Ok(value) => value,
        Err(_) => return,
    };
    substitute_in_value(&mut value, variables);
    if let Ok(substituted) = serde_json::from_value(value) {
        *document = substituted;
    }
}

fn substitute_in_value(value: &mut serde_json::Value, variables: &HashMap<String, String>) {
    match value {
        serde_json::Value::String(text) => *text = substitute_in_string(text, variables),
        serde_json::Value::Array(items) => {
            for item in items {
                substitute_in_value(item, variables);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_in_value(item, variables);
            }
        }
        _ => {}
    }
}

/// Replaces every `{{name}}` placeholder whose name does not start with
/// `steps.` with `variables[name]`; unresolved or excluded placeholders
/// are left verbatim for the runner itself to interpret (§4.7).
fn substitute_in_string(input: &str, variables: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            output.push_str(&rest[start..]);
            return output;
        };
        let name = after_open[..end].trim();
        if name.starts_with("steps.") {
            output.push_str("{{");
            output.push_str(name);
            output.push_str("}}");
        } else if let Some(replacement) = variables.get(name) {
            output.push_str(replacement);
        } else {
            output.push_str("{{");
            output.push_str(name);
            output.push_str("}}");
        }
        rest = &after_open[end + 2..];
    }
    output.push_str(rest);
    output
}

fn apply_trajectory_toggle(document: &mut WorkflowDocument, enabled: bool) {
    if !enabled {
        document.trajectory = Some(Trajectory::Disabled);
        return;
    }
    document.trajectory = Some(match document.trajectory.take() {
        Some(Trajectory::Options(mut options)) => {
            options.enable = true;
            Trajectory::Options(options)
        }
        _ => Trajectory::Options(TrajectoryOptions {
            enable: true,
            reflect_on_barriers: false,
            reflect_on_converge: false,
            auto_decisions: false,
        }),
    });
}

fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        candidate.is_file().then_some(candidate)
    })
}

fn resolve_runner_invocation(options: &WorkflowRunOptions) -> Result<(String, Vec<String>), WorkflowError> {
    if let Some(explicit) = &options.runner_binary {
        return Ok((explicit.clone(), Vec::new()));
    }
    if which("agent-relay").is_some() {
        return Ok(("agent-relay".to_string(), Vec::new()));
    }
    if which("npx").is_some() {
        return Ok(("npx".to_string(), vec!["agent-relay".to_string()]));
    }
    Err(WorkflowError::RunnerNotFound)
}

struct LineRecord {
    raw: String,
    parsed: Option<RunnerLine>,
}

async fn ingest_loop<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<LineRecord>) {
    let mut ingestor = AsyncLineIngestor::new(reader, IngestLimits::default(), RunnerLineParser);
    while let Some(ingested) = ingestor.next_line().await {
        let parsed = match ingested.outcome {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(error = %err, "dropped unparsed runner output line");
                None
            }
        };
        if tx
            .send(LineRecord {
                raw: ingested.raw,
                parsed,
            })
            .is_err()
        {
            break;
        }
    }
}

#[derive(Default)]
struct Aggregator {
    events: Vec<WorkflowEvent>,
    steps: Vec<StepResult>,
    last_non_empty_raw_line: Option<String>,
    last_run_failed_detail: Option<String>,
    run_id: Option<String>,
    saw_cancelled: bool,
}

impl Aggregator {
    fn ingest(&mut self, record: LineRecord, listener: Option<&WorkflowEventListener>) {
        if !record.raw.trim().is_empty() {
            self.last_non_empty_raw_line = Some(record.raw.clone());
        }

        let Some(parsed) = record.parsed else {
            return;
        };

        let event = match parsed {
            RunnerLine::Run { status, detail } => match status {
                RunStatus::Started => {
                    if let Some(detail) = &detail {
                        self.run_id = Some(detail.clone());
                    }
                    WorkflowEvent::RunStarted
                }
                RunStatus::Completed => WorkflowEvent::RunCompleted,
                RunStatus::Failed => {
                    self.last_run_failed_detail = detail.clone();
                    WorkflowEvent::RunFailed { detail }
                }
                RunStatus::Cancelled => {
                    self.saw_cancelled = true;
                    WorkflowEvent::RunCancelled
                }
            },
            RunnerLine::Step { name, status, detail } => {
                self.update_step(&name, step_status_label(status), detail.clone());
                match status {
                    StepStatus::Started => WorkflowEvent::StepStarted { name },
                    StepStatus::Completed => WorkflowEvent::StepCompleted { name },
                    StepStatus::Failed => WorkflowEvent::StepFailed { name, detail },
                    StepStatus::Skipped => WorkflowEvent::StepSkipped { name },
                    StepStatus::Retrying => WorkflowEvent::StepRetrying { name },
                    StepStatus::Nudged => WorkflowEvent::StepNudged { name },
                    StepStatus::ForceReleased => WorkflowEvent::StepForceReleased { name },
                }
            }
        };

        if let Some(listener) = listener {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!("workflow event listener panicked; continuing to dispatch remaining events");
            }
        }
        self.events.push(event);
    }

    fn update_step(&mut self, name: &str, status: &str, error: Option<String>) {
        if let Some(existing) = self.steps.iter_mut().find(|step| step.name == name) {
            existing.status = status.to_string();
            if error.is_some() {
                existing.error = error;
            }
        } else {
            self.steps.push(StepResult {
                name: name.to_string(),
                status: status.to_string(),
                error,
                output: None,
            });
        }
    }

    fn finish(self, exit_code: Option<i32>) -> WorkflowResult {
        let status = if self.saw_cancelled {
            "cancelled"
        } else if exit_code == Some(0) {
            "completed"
        } else {
            "failed"
        };

        let error = if status == "failed" {
            Some(
                self.last_run_failed_detail
                    .or_else(|| self.last_non_empty_raw_line.clone())
                    .unwrap_or_else(|| "Workflow failed".to_string()),
            )
        } else {
            None
        };

        WorkflowResult {
            status: status.to_string(),
            run_id: self.run_id,
            error,
            events: self.events,
            steps: self.steps,
        }
    }
}

fn step_status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Started => "started",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Retrying => "retrying",
        StepStatus::Nudged => "nudged",
        StepStatus::ForceReleased => "force-released",
    }
}
