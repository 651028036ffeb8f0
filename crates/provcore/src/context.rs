use crate::api::{ComputeProvider, PatchClient, PatchConnector};
use crate::events::{EventBus, EventEmitter, ExecutionId};
use crate::{PatchJobRecord, ProjectCache, Registry, ResourceKind, ResourceRegistry, StepGraph, WorkflowError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Core trait that every step type implements.
///
/// `populate` and `validate` run for the whole graph, in dependency order,
/// before any step runs. `run` is invoked once the step's dependencies
/// have completed.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Type identifier used in logs and events (e.g. "CreateSnapshots")
    fn step_type(&self) -> &'static str;

    /// Derive names, defaults and fully-qualified references
    async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError>;

    /// Check required fields and register resource creation and usage
    async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError>;

    async fn run(&self, ctx: &StepContext) -> Result<(), WorkflowError>;
}

/// What a fan-out step does with in-flight workers once cancellation is raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelPolicy {
    /// Wait for in-flight workers to finish before returning
    Drain,
    /// Return immediately and leave in-flight workers to finish on their own
    Detach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPolicies {
    /// Resource creation steps; draining keeps every created resource recorded
    pub creation: CancelPolicy,
    /// Polling steps
    pub polling: CancelPolicy,
}

impl Default for CancelPolicies {
    fn default() -> Self {
        Self {
            creation: CancelPolicy::Drain,
            polling: CancelPolicy::Detach,
        }
    }
}

/// Execution knobs shared by every step of a workflow
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub cancel: CancelPolicies,
    pub default_poll_interval: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            cancel: CancelPolicies::default(),
            default_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Clients for the provider APIs a workflow talks to
#[derive(Clone)]
pub struct Providers {
    pub compute: Arc<dyn ComputeProvider>,
    pub patch: Option<Arc<dyn PatchConnector>>,
}

impl Providers {
    pub fn new(compute: Arc<dyn ComputeProvider>) -> Self {
        Self { compute, patch: None }
    }

    pub fn with_patch(mut self, connector: Arc<dyn PatchConnector>) -> Self {
        self.patch = Some(connector);
        self
    }
}

/// Workflow-level fields visible to steps
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowMeta {
    pub name: String,
    pub project: String,
    pub zone: String,
    pub gcs_path: String,
    pub oauth_path: String,
    pub username: String,
    pub id: String,
}

/// State shared by all steps of one workflow run: registries, caches,
/// provider clients and the cancellation signal.
pub struct WorkflowContext {
    pub meta: WorkflowMeta,
    pub execution_id: ExecutionId,
    pub graph: StepGraph,
    pub settings: ExecutionSettings,
    pub instances: ResourceRegistry,
    pub disks: ResourceRegistry,
    pub machine_images: ResourceRegistry,
    pub snapshots: ResourceRegistry,
    pub patch_jobs: Registry<PatchJobRecord>,
    vars: BTreeMap<String, String>,
    compute: Arc<dyn ComputeProvider>,
    patch_connector: Option<Arc<dyn PatchConnector>>,
    patch_client: OnceCell<Option<Arc<dyn PatchClient>>>,
    projects: ProjectCache,
    cancellation: CancellationToken,
    events: Arc<EventBus>,
}

impl WorkflowContext {
    pub fn new(
        meta: WorkflowMeta,
        vars: BTreeMap<String, String>,
        graph: StepGraph,
        providers: Providers,
        settings: ExecutionSettings,
        cancellation: CancellationToken,
        events: Arc<EventBus>,
    ) -> Self {
        let compute = providers.compute;
        Self {
            meta,
            execution_id: ExecutionId::new_v4(),
            graph,
            settings,
            instances: ResourceRegistry::new(ResourceKind::Instance, compute.clone()),
            disks: ResourceRegistry::new(ResourceKind::Disk, compute.clone()),
            machine_images: ResourceRegistry::new(ResourceKind::MachineImage, compute.clone()),
            snapshots: ResourceRegistry::new(ResourceKind::Snapshot, compute.clone()),
            patch_jobs: Registry::new(ResourceKind::PatchJob),
            vars,
            compute,
            patch_connector: providers.patch,
            patch_client: OnceCell::new(),
            projects: ProjectCache::new(),
            cancellation,
            events,
        }
    }

    pub fn compute(&self) -> &Arc<dyn ComputeProvider> {
        &self.compute
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Replace `${VAR}` references with workflow variables and built-ins
    pub fn substitute(&self, s: &str) -> String {
        if !s.contains("${") {
            return s.to_string();
        }
        let builtins = [
            ("NAME", &self.meta.name),
            ("PROJECT", &self.meta.project),
            ("ZONE", &self.meta.zone),
            ("GCSPATH", &self.meta.gcs_path),
            ("ID", &self.meta.id),
            ("USERNAME", &self.meta.username),
        ];
        let mut out = s.to_string();
        for (k, v) in self.vars.iter().map(|(k, v)| (k.as_str(), v)).chain(builtins) {
            out = out.replace(&format!("${{{}}}", k), v);
        }
        out
    }

    /// Real name for a resource: `<name>-<workflow>-<id>`, at most 63 characters
    pub fn gen_name(&self, name: &str) -> String {
        let suffix = format!("-{}", self.meta.id);
        let prefix = if self.meta.name.is_empty() {
            name.to_string()
        } else {
            format!("{}-{}", name, self.meta.name)
        };
        let max = 63usize.saturating_sub(suffix.len());
        let prefix: String = prefix.chars().take(max).collect();
        format!("{}{}", prefix.trim_end_matches('-'), suffix).to_lowercase()
    }

    pub async fn project_exists(&self, project: &str) -> Result<bool, WorkflowError> {
        self.projects.exists(self.compute.as_ref(), project).await
    }

    /// Connect the patch client on first use. A failed connection is
    /// reported once; later callers see the recorded failure marker.
    pub async fn connect_patch_client(&self) -> Result<(), WorkflowError> {
        let mut failure = None;
        let connect = async {
            match self.open_patch_client().await {
                Ok(client) => Some(client),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            }
        };
        self.patch_client.get_or_init(|| connect).await;
        failure.map_or(Ok(()), Err)
    }

    async fn open_patch_client(&self) -> Result<Arc<dyn PatchClient>, WorkflowError> {
        let connector = self
            .patch_connector
            .as_ref()
            .ok_or_else(|| WorkflowError::Validation("no patch API connector configured".to_string()))?;
        let credentials = (!self.meta.oauth_path.is_empty()).then_some(self.meta.oauth_path.as_str());
        connector
            .connect(credentials)
            .await
            .map_err(|e| WorkflowError::provider("error creating patch client", e))
    }

    pub fn patch_client(&self) -> Result<Arc<dyn PatchClient>, WorkflowError> {
        self.patch_client
            .get()
            .and_then(|c| c.clone())
            .ok_or_else(|| WorkflowError::Execution("patch client is not available".to_string()))
    }

    pub fn step_context(self: &Arc<Self>, step: &str) -> StepContext {
        StepContext {
            step: step.to_string(),
            workflow: self.clone(),
            events: self.events.create_emitter(self.execution_id, step),
            cancellation: self.cancellation.child_token(),
        }
    }
}

/// Execution context passed to each step
#[derive(Clone)]
pub struct StepContext {
    pub step: String,
    pub workflow: Arc<WorkflowContext>,
    pub events: EventEmitter,
    cancellation: CancellationToken,
}

impl StepContext {
    /// Step-scoped token, cancelled with the workflow or when the step
    /// runs past its timeout
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Log a step message and forward it to event subscribers
    pub fn info(&self, step_type: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(workflow = %self.workflow.meta.name, step = %self.step, step_type, "{}", message);
        self.events.info(step_type, message);
    }

    pub fn warn(&self, step_type: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(workflow = %self.workflow.meta.name, step = %self.step, step_type, "{}", message);
        self.events.warn(step_type, message);
    }
}
