use crate::definition::{StepDefinition, VarDefinition, WorkflowDefinition};
use crate::executor::StepScheduler;
use crate::runtime::RuntimeConfig;
use chrono::Utc;
use provcore::{
    parse_duration, ErrorList, EventBus, ExecutionEvent, ExecutionId, ExecutionSettings, Providers, StepAction,
    StepGraph, WorkflowContext, WorkflowError, WorkflowMeta,
};
use provsteps::StepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A workflow variable, substituted into step fields as `${name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Var {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A named unit of work
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub timeout: Option<Duration>,
    pub action: StepKind,
}

/// Outcome of a successful workflow run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub execution_id: ExecutionId,
    /// Steps in completion order
    pub completed: Vec<String>,
    /// The run stopped early because cancellation was raised
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Populated,
    Validated,
    Ran,
}

/// A graph of steps executed against one set of providers.
///
/// The lifecycle is populate, validate, run. Each phase covers the whole
/// graph in dependency order and runs at most once; `run` performs the
/// earlier phases when they have not happened yet.
pub struct Workflow {
    pub name: String,
    pub project: String,
    pub zone: String,
    pub gcs_path: String,
    pub oauth_path: String,
    pub username: String,
    /// Suffix for generated resource names, random when empty
    pub id: String,
    vars: BTreeMap<String, Var>,
    steps: BTreeMap<String, Step>,
    graph: StepGraph,
    providers: Providers,
    config: RuntimeConfig,
    events: Arc<EventBus>,
    cancellation: CancellationToken,
    execution_id: ExecutionId,
    context: Option<Arc<WorkflowContext>>,
    phase: Phase,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        providers: Providers,
        config: RuntimeConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            name: name.into(),
            project: String::new(),
            zone: String::new(),
            gcs_path: String::new(),
            oauth_path: String::new(),
            username: String::new(),
            id: String::new(),
            vars: BTreeMap::new(),
            steps: BTreeMap::new(),
            graph: StepGraph::new(),
            providers,
            config,
            events,
            cancellation: CancellationToken::new(),
            execution_id: ExecutionId::new_v4(),
            context: None,
            phase: Phase::New,
        }
    }

    pub(crate) fn apply_definition(&mut self, def: WorkflowDefinition) -> Result<(), WorkflowError> {
        self.name = def.name;
        self.project = def.project;
        self.zone = def.zone;
        self.gcs_path = def.gcs_path;
        self.oauth_path = def.oauth_path;
        for (name, var) in def.vars {
            self.declare_var(name, var.into());
        }

        let mut errs = ErrorList::new();
        for (name, step) in def.steps {
            let timeout = if step.timeout.is_empty() {
                None
            } else {
                match parse_duration(&step.timeout) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        errs.push(WorkflowError::Validation(format!("step {:?}: bad Timeout: {}", name, e)));
                        None
                    }
                }
            };
            if let Some(step) = errs.check(self.add_step(name, step.kind)) {
                step.timeout = timeout;
            }
        }
        errs.into_result()?;

        for (dependent, dependencies) in &def.dependencies {
            for dependency in dependencies {
                self.add_dependency(dependent, dependency)?;
            }
        }
        Ok(())
    }

    pub fn add_step(&mut self, name: impl Into<String>, action: impl Into<StepKind>) -> Result<&mut Step, WorkflowError> {
        self.ensure_phase(Phase::New)?;
        let name = name.into();
        self.graph.add_step(name.clone())?;
        let step = Step {
            name: name.clone(),
            timeout: None,
            action: action.into(),
        };
        Ok(self.steps.entry(name).or_insert(step))
    }

    /// Make `dependent` run only after `dependency` has completed
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<(), WorkflowError> {
        self.ensure_phase(Phase::New)?;
        self.graph.add_dependency(dependent, dependency)
    }

    pub fn declare_var(&mut self, name: impl Into<String>, var: Var) {
        self.vars.insert(name.into(), var);
    }

    /// Set the value of a variable, declaring it if needed
    pub fn add_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.entry(name.into()).or_default().value = value.into();
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Shared run state, available once populated
    pub fn context(&self) -> Option<&Arc<WorkflowContext>> {
        self.context.as_ref()
    }

    /// Token that cancels this workflow's run
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replace the cancellation token, e.g. with a child of a chain's token
    pub fn set_cancellation(&mut self, token: CancellationToken) -> Result<(), WorkflowError> {
        self.ensure_phase(Phase::New)?;
        self.cancellation = token;
        Ok(())
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    fn ensure_phase(&self, phase: Phase) -> Result<(), WorkflowError> {
        if self.phase == phase {
            return Ok(());
        }
        Err(WorkflowError::Execution(format!(
            "workflow {:?} is {:?}, expected {:?}",
            self.name, self.phase, phase
        )))
    }

    fn require_context(&self) -> Result<Arc<WorkflowContext>, WorkflowError> {
        self.context
            .clone()
            .ok_or_else(|| WorkflowError::Execution(format!("workflow {:?} is not populated", self.name)))
    }

    /// Derive names and defaults for every step
    pub async fn populate(&mut self) -> Result<(), WorkflowError> {
        if self.phase != Phase::New {
            return Ok(());
        }

        if self.username.is_empty() {
            self.username = std::env::var("USER").unwrap_or_else(|_| "provflow".to_string());
        }
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().simple().to_string()[..5].to_string();
        }

        let mut errs = ErrorList::new();
        for (name, var) in &self.vars {
            if var.required && var.value.is_empty() {
                errs.push(WorkflowError::Validation(format!(
                    "cannot populate workflow {:?}: required var {:?} is not set",
                    self.name, name
                )));
            }
        }
        errs.into_result()?;

        let meta = WorkflowMeta {
            name: self.name.clone(),
            project: self.project.clone(),
            zone: self.zone.clone(),
            gcs_path: self.gcs_path.clone(),
            oauth_path: self.oauth_path.clone(),
            username: self.username.clone(),
            id: self.id.clone(),
        };
        let vars = self.vars.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect();
        let settings = ExecutionSettings {
            cancel: self.config.cancel,
            default_poll_interval: self.config.default_poll_interval,
        };
        let mut context = WorkflowContext::new(
            meta,
            vars,
            self.graph.clone(),
            self.providers.clone(),
            settings,
            self.cancellation.clone(),
            self.events.clone(),
        );
        context.execution_id = self.execution_id;
        let context = Arc::new(context);

        let mut errs = ErrorList::new();
        for name in self.graph.topological_order()? {
            let step = self.steps.get_mut(&name).ok_or_else(|| WorkflowError::StepNotFound(name.clone()))?;
            errs.check(step.action.populate(&context.step_context(&name)).await);
        }
        errs.into_result()?;

        self.context = Some(context);
        self.phase = Phase::Populated;
        Ok(())
    }

    /// Check every step and register resource creation and use. Ordering
    /// violations surface here, before anything runs.
    pub async fn validate(&mut self) -> Result<(), WorkflowError> {
        self.populate().await?;
        if self.phase != Phase::Populated {
            return Ok(());
        }
        let context = self.require_context()?;

        let mut errs = ErrorList::new();
        for name in self.graph.topological_order()? {
            let step = self.steps.get(&name).ok_or_else(|| WorkflowError::StepNotFound(name.clone()))?;
            errs.check(step.action.validate(&context.step_context(&name)).await);
        }
        errs.into_result()?;

        self.phase = Phase::Validated;
        Ok(())
    }

    /// Run the workflow and clean up the resources it created
    pub async fn run(&mut self) -> Result<RunSummary, WorkflowError> {
        if self.phase == Phase::Ran {
            return Err(WorkflowError::Execution(format!("workflow {:?} has already run", self.name)));
        }

        let start = Instant::now();
        self.events.emit(ExecutionEvent::WorkflowStarted {
            execution_id: self.execution_id,
            workflow: self.name.clone(),
            timestamp: Utc::now(),
        });
        info!(workflow = %self.name, "running workflow");

        let result = self.execute().await;

        if self.config.cleanup {
            let errs = self.cleanup().await;
            for err in errs.iter() {
                warn!(workflow = %self.name, "cleanup error: {}", err);
            }
        }

        match &result {
            Ok(summary) if summary.cancelled => info!(workflow = %self.name, "workflow cancelled"),
            Ok(_) => info!(workflow = %self.name, "workflow finished"),
            Err(e) => error!(workflow = %self.name, "workflow failed: {}", e),
        }
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: self.execution_id,
            workflow: self.name.clone(),
            success: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }

    async fn execute(&mut self) -> Result<RunSummary, WorkflowError> {
        self.validate().await?;
        let context = self.require_context()?;
        self.phase = Phase::Ran;

        StepScheduler::new(self.config.max_parallel_steps)
            .execute(&context, self.steps.clone())
            .await
    }

    /// Delete every resource this workflow created that is not marked
    /// NoCleanup
    pub async fn cleanup(&self) -> ErrorList {
        let mut errs = ErrorList::new();
        let Some(context) = &self.context else {
            return errs;
        };
        for registry in [
            &context.snapshots,
            &context.machine_images,
            &context.disks,
            &context.instances,
        ] {
            for err in registry.cleanup().await.iter() {
                errs.push(err.clone());
            }
        }
        errs
    }

    /// Current state of the workflow in definition form
    pub fn to_definition(&self) -> WorkflowDefinition {
        let steps = self
            .steps
            .iter()
            .map(|(name, step)| {
                let def = StepDefinition {
                    timeout: step.timeout.map(|d| format!("{:?}", d)).unwrap_or_default(),
                    kind: step.action.clone(),
                };
                (name.clone(), def)
            })
            .collect();
        let dependencies = self
            .steps
            .keys()
            .filter_map(|name| {
                let deps: Vec<String> = self.graph.dependencies(name).into_iter().map(str::to_string).collect();
                (!deps.is_empty()).then(|| (name.clone(), deps))
            })
            .collect();

        WorkflowDefinition {
            name: self.name.clone(),
            project: self.project.clone(),
            zone: self.zone.clone(),
            gcs_path: self.gcs_path.clone(),
            oauth_path: self.oauth_path.clone(),
            vars: self
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), VarDefinition::Declared(v.clone())))
                .collect(),
            steps,
            dependencies,
        }
    }

    /// Populate, then render the workflow as pretty JSON
    pub async fn print(&mut self) -> Result<String, WorkflowError> {
        self.populate().await?;
        serde_json::to_string_pretty(&self.to_definition())
            .map_err(|e| WorkflowError::Execution(format!("error serializing workflow {:?}: {}", self.name, e)))
    }
}
