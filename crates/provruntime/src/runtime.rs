use crate::chain::ChainedWorkflow;
use crate::definition::{DefinitionError, WorkflowDefinition, WorkflowLoader};
use crate::workflow::Workflow;
use provcore::{CancelPolicies, EventBus, ExecutionEvent, Providers, WorkflowError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Main entry point: builds workflows and chains that share one set of
/// provider clients, one configuration and one event bus.
#[derive(Clone)]
pub struct Runtime {
    providers: Providers,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
}

impl Runtime {
    /// Create a new runtime with default settings
    pub fn new(providers: Providers) -> Self {
        Self::with_config(providers, RuntimeConfig::default())
    }

    pub fn with_config(providers: Providers, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            providers,
            config,
            event_bus,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// An empty workflow bound to this runtime
    pub fn workflow(&self, name: impl Into<String>) -> Workflow {
        Workflow::new(name, self.providers.clone(), self.config.clone(), self.event_bus.clone())
    }

    pub fn workflow_from_definition(&self, definition: WorkflowDefinition) -> Result<Workflow, WorkflowError> {
        let mut workflow = self.workflow(definition.name.clone());
        workflow.apply_definition(definition)?;
        Ok(workflow)
    }

    /// Load a workflow definition file
    pub fn load_workflow(&self, path: impl AsRef<Path>) -> Result<Workflow, DefinitionError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading workflow");
        let definition = WorkflowDefinition::from_file(path)?;
        Ok(self.workflow_from_definition(definition)?)
    }

    /// Load a chained workflow file together with a loader resolving its
    /// link locators relative to the file's directory.
    pub fn load_chain(&self, path: impl AsRef<Path>) -> Result<(ChainedWorkflow, FileLoader), DefinitionError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading chained workflow");
        let chain = ChainedWorkflow::from_file(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok((chain, self.file_loader(base)))
    }

    pub fn file_loader(&self, base: impl Into<PathBuf>) -> FileLoader {
        FileLoader {
            runtime: self.clone(),
            base: base.into(),
        }
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Loads linked workflows from files relative to a base directory
pub struct FileLoader {
    runtime: Runtime,
    base: PathBuf,
}

impl WorkflowLoader for FileLoader {
    fn load(&self, locator: &str) -> Result<Workflow, DefinitionError> {
        self.runtime.load_workflow(self.base.join(locator))
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_parallel_steps: usize,
    pub event_buffer_size: usize,
    /// Polling interval for AwaitPatchJobs entries without an Interval
    pub default_poll_interval: Duration,
    pub cancel: CancelPolicies,
    /// Delete created resources once a workflow has run
    pub cleanup: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 10,
            event_buffer_size: 1000,
            default_poll_interval: Duration::from_secs(5),
            cancel: CancelPolicies::default(),
            cleanup: true,
        }
    }
}
