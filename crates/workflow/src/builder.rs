use crate::config::{
    Coordination, ErrorHandling, SharedState, SwarmConfig, SwarmPattern, Trajectory,
    TrajectoryOptions, WorkflowAgent, WorkflowDef, WorkflowDocument, WorkflowStep, CONFIG_VERSION,
};
use crate::error::WorkflowError;

/// Fluent accumulator for a workflow configuration (§4.6).
///
/// `build()` is the only point where the empty-agents/empty-steps
/// programmer errors are raised; every setter is infallible.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    swarm: SwarmConfig,
    agents: Vec<WorkflowAgent>,
    steps: Vec<WorkflowStep>,
    error_handling: Option<ErrorHandling>,
    coordination: Option<Coordination>,
    shared_state: Option<SharedState>,
    trajectory: Option<Trajectory>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            swarm: SwarmConfig::default(),
            agents: Vec::new(),
            steps: Vec::new(),
            error_handling: None,
            coordination: None,
            shared_state: None,
            trajectory: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn swarm_pattern(mut self, pattern: SwarmPattern) -> Self {
        self.swarm.pattern = pattern;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.swarm.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn global_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.swarm.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.swarm.channel = Some(channel.into());
        self
    }

    pub fn idle_nudge_threshold_secs(mut self, threshold_secs: u64) -> Self {
        self.swarm.idle_nudge_threshold_secs = Some(threshold_secs);
        self
    }

    pub fn agent(mut self, agent: WorkflowAgent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = WorkflowAgent>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = WorkflowStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.error_handling = Some(error_handling);
        self
    }

    pub fn coordination(mut self, coordination: Coordination) -> Self {
        self.coordination = Some(coordination);
        self
    }

    pub fn shared_state(mut self, shared_state: SharedState) -> Self {
        self.shared_state = Some(shared_state);
        self
    }

    /// Sets trajectory recording. Rejects combining `enable: false` with
    /// any other `true` option, since that combination is contradictory
    /// (§7 "trajectory override combines `false` with other options").
    pub fn trajectory(mut self, trajectory: Trajectory) -> Result<Self, WorkflowError> {
        if let Trajectory::Options(options) = &trajectory {
            let TrajectoryOptions {
                enable,
                reflect_on_barriers,
                reflect_on_converge,
                auto_decisions,
            } = *options;
            if !enable && (reflect_on_barriers || reflect_on_converge || auto_decisions) {
                return Err(WorkflowError::ConflictingTrajectoryOptions);
            }
        }
        self.trajectory = Some(trajectory);
        Ok(self)
    }

    pub fn build(self) -> Result<WorkflowDocument, WorkflowError> {
        if self.agents.is_empty() {
            return Err(WorkflowError::NoAgents { name: self.name });
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps { name: self.name });
        }

        Ok(WorkflowDocument {
            version: CONFIG_VERSION,
            name: self.name.clone(),
            description: self.description,
            swarm: self.swarm,
            agents: self.agents,
            workflows: vec![WorkflowDef {
                name: self.name,
                steps: self.steps,
            }],
            error_handling: self.error_handling,
            coordination: self.coordination,
            shared_state: self.shared_state,
            trajectory: self.trajectory,
        })
    }
}

/// One task in a [`fan_out`] template call.
#[derive(Debug, Clone)]
pub struct FanOutTask {
    pub agent_name: String,
    pub cli: Option<String>,
    pub task: String,
    pub model: Option<String>,
    pub interactive: Option<bool>,
}

impl FanOutTask {
    pub fn new(agent_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            cli: None,
            task: task.into(),
            model: None,
            interactive: None,
        }
    }
}

/// A fan-out workflow: every task runs on its own agent with no
/// dependencies between steps (§4.6 templates).
pub fn fan_out(name: impl Into<String>, tasks: Vec<FanOutTask>) -> Result<WorkflowDocument, WorkflowError> {
    if tasks.is_empty() {
        return Err(WorkflowError::EmptyTemplateInput);
    }

    let mut builder = WorkflowBuilder::new(name).swarm_pattern(SwarmPattern::FanOut);

    for task in tasks {
        let mut agent = WorkflowAgent::new(task.agent_name.clone());
        agent.cli = task.cli;
        agent.model = task.model;
        agent.role = Some(format!("fan-out worker for {}", task.agent_name));
        agent.interactive = task.interactive;

        let step = WorkflowStep::new(
            format!("{}-step", task.agent_name),
            task.agent_name,
            task.task,
        );

        builder = builder.agent(agent).step(step);
    }

    builder.build()
}

/// One stage in a [`pipeline`] template call.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub agent_name: String,
    pub cli: Option<String>,
    pub task: String,
    pub model: Option<String>,
    pub extra_depends_on: Vec<String>,
    pub interactive: Option<bool>,
}

impl PipelineStage {
    pub fn new(agent_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            cli: None,
            task: task.into(),
            model: None,
            extra_depends_on: Vec::new(),
            interactive: None,
        }
    }
}

/// A pipeline workflow: stages run in sequence, each depending on the one
/// before it in addition to any caller-supplied dependencies (§4.6
/// "threads each stage's dependency on the previous step automatically
/// while preserving caller-supplied extra dependencies").
pub fn pipeline(
    name: impl Into<String>,
    stages: Vec<PipelineStage>,
) -> Result<WorkflowDocument, WorkflowError> {
    if stages.is_empty() {
        return Err(WorkflowError::EmptyTemplateInput);
    }

    let mut builder = WorkflowBuilder::new(name).swarm_pattern(SwarmPattern::Pipeline);
    let mut previous_step_name: Option<String> = None;

    for stage in stages {
        let mut agent = WorkflowAgent::new(stage.agent_name.clone());
        agent.cli = stage.cli;
        agent.model = stage.model;
        agent.role = Some(format!("pipeline stage for {}", stage.agent_name));
        agent.interactive = stage.interactive;

        let step_name = format!("{}-step", stage.agent_name);
        let mut step = WorkflowStep::new(step_name.clone(), stage.agent_name, stage.task);
        step.depends_on = stage.extra_depends_on;
        if let Some(previous) = &previous_step_name {
            if !step.depends_on.contains(previous) {
                step.depends_on.push(previous.clone());
            }
        }
        previous_step_name = Some(step_name);

        builder = builder.agent(agent).step(step);
    }

    builder.build()
}

/// A fully explicit DAG workflow: the caller supplies agents and steps
/// (with their own dependency edges) directly (§4.6 templates).
pub fn dag(
    name: impl Into<String>,
    agents: Vec<WorkflowAgent>,
    steps: Vec<WorkflowStep>,
) -> Result<WorkflowDocument, WorkflowError> {
    if agents.is_empty() || steps.is_empty() {
        return Err(WorkflowError::EmptyTemplateInput);
    }

    WorkflowBuilder::new(name)
        .swarm_pattern(SwarmPattern::Dag)
        .agents(agents)
        .steps(steps)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_fails_without_agents() {
        let err = WorkflowBuilder::new("demo").step(WorkflowStep::new("s1", "a", "do it")).build();
        assert!(matches!(err, Err(WorkflowError::NoAgents { .. })));
    }

    #[test]
    fn build_fails_without_steps() {
        let err = WorkflowBuilder::new("demo").agent(WorkflowAgent::new("a")).build();
        assert!(matches!(err, Err(WorkflowError::NoSteps { .. })));
    }

    #[test]
    fn build_omits_unset_optional_sections() {
        let doc = WorkflowBuilder::new("demo")
            .agent(WorkflowAgent::new("a"))
            .step(WorkflowStep::new("s1", "a", "do it"))
            .build()
            .unwrap();
        let value = serde_json::to_value(&doc).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("errorHandling"));
        assert!(!object.contains_key("coordination"));
        assert!(!object.contains_key("sharedState"));
        assert!(!object.contains_key("trajectory"));
    }

    #[test]
    fn fan_out_rejects_empty_tasks() {
        assert!(matches!(fan_out("demo", vec![]), Err(WorkflowError::EmptyTemplateInput)));
    }

    #[test]
    fn pipeline_chains_steps_in_order() {
        let doc = pipeline(
            "demo",
            vec![
                PipelineStage::new("build", "build it"),
                PipelineStage::new("test", "test it"),
            ],
        )
        .unwrap();
        let steps = &doc.workflows[0].steps;
        assert_eq!(steps[0].depends_on, Vec::<String>::new());
        assert_eq!(steps[1].depends_on, vec!["build-step".to_string()]);
    }

    #[test]
    fn pipeline_preserves_extra_dependencies() {
        let mut stage = PipelineStage::new("test", "test it");
        stage.extra_depends_on = vec!["lint-step".to_string()];
        let doc = pipeline("demo", vec![PipelineStage::new("build", "build it"), stage]).unwrap();
        let deps = &doc.workflows[0].steps[1].depends_on;
        assert!(deps.contains(&"lint-step".to_string()));
        assert!(deps.contains(&"build-step".to_string()));
    }

    #[test]
    fn dag_rejects_empty_agents_or_steps() {
        assert!(matches!(
            dag("demo", vec![], vec![WorkflowStep::new("s", "a", "t")]),
            Err(WorkflowError::EmptyTemplateInput)
        ));
        assert!(matches!(
            dag("demo", vec![WorkflowAgent::new("a")], vec![]),
            Err(WorkflowError::EmptyTemplateInput)
        ));
    }

    #[test]
    fn fan_out_propagates_role_and_optional_interactive_flag() {
        let mut task = FanOutTask::new("reviewer", "review the diff");
        task.interactive = Some(true);
        let doc = fan_out("demo", vec![task]).unwrap();
        let agent = &doc.agents[0];
        assert_eq!(agent.role.as_deref(), Some("fan-out worker for reviewer"));
        assert_eq!(agent.interactive, Some(true));
    }

    #[test]
    fn pipeline_leaves_interactive_unset_by_default() {
        let doc = pipeline("demo", vec![PipelineStage::new("build", "build it")]).unwrap();
        assert_eq!(doc.agents[0].interactive, None);
    }

    #[test]
    fn trajectory_rejects_disable_combined_with_other_options() {
        let result = WorkflowBuilder::new("demo").trajectory(Trajectory::Options(TrajectoryOptions {
            enable: false,
            reflect_on_barriers: true,
            reflect_on_converge: false,
            auto_decisions: false,
        }));
        assert!(matches!(result, Err(WorkflowError::ConflictingTrajectoryOptions)));
    }
}
