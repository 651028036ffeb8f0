#![allow(dead_code)]

use provcore::memory::InMemoryProvider;
use provcore::{
    EventBus, ExecutionSettings, Providers, StepAction, StepGraph, WorkflowContext, WorkflowError, WorkflowMeta,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const PROJECT: &str = "test-project";
pub const ZONE: &str = "us-central1-a";

// Helper function to create a workflow context over the in-memory provider
pub fn create_test_workflow(
    provider: &InMemoryProvider,
    steps: &[&str],
    dependencies: &[(&str, &str)],
) -> Arc<WorkflowContext> {
    let mut graph = StepGraph::new();
    for step in steps {
        graph.add_step(*step).unwrap();
    }
    for (dependent, dependency) in dependencies {
        graph.add_dependency(dependent, dependency).unwrap();
    }

    let meta = WorkflowMeta {
        name: "wf".to_string(),
        project: PROJECT.to_string(),
        zone: ZONE.to_string(),
        username: "tester".to_string(),
        id: "abcde".to_string(),
        ..Default::default()
    };
    let providers = Providers::new(Arc::new(provider.clone())).with_patch(Arc::new(provider.clone()));

    Arc::new(WorkflowContext::new(
        meta,
        BTreeMap::new(),
        graph,
        providers,
        ExecutionSettings::default(),
        CancellationToken::new(),
        Arc::new(EventBus::new(100)),
    ))
}

// Populate then validate a step, as the workflow does before running
pub async fn prepare<S: StepAction>(
    wf: &Arc<WorkflowContext>,
    step: &str,
    action: &mut S,
) -> Result<(), WorkflowError> {
    let ctx = wf.step_context(step);
    action.populate(&ctx).await?;
    action.validate(&ctx).await
}
