#![allow(dead_code)]

use provcore::memory::{Call, InMemoryProvider};
use provcore::Providers;
use provruntime::{Runtime, Workflow};
use provsteps::{CreateSnapshots, Snapshot};
use std::sync::Arc;

pub const PROJECT: &str = "chain-project";
pub const ZONE: &str = "us-central1-a";
pub const DISK: &str = "data";

pub fn provider() -> InMemoryProvider {
    InMemoryProvider::new()
        .with_project(PROJECT)
        .with_disk(PROJECT, ZONE, DISK)
}

// Helper function to create a runtime over the in-memory provider
pub fn create_test_runtime(provider: &InMemoryProvider) -> Runtime {
    let providers = Providers::new(Arc::new(provider.clone())).with_patch(Arc::new(provider.clone()));
    Runtime::new(providers)
}

/// Snapshot descriptor with an exact name, sourced from the seeded disk
pub fn snapshot(name: &str) -> Snapshot {
    let mut snapshot = Snapshot::new(name, format!("zones/{}/disks/{}", ZONE, DISK));
    snapshot.resource.exact_name = true;
    snapshot
}

/// Workflow with a single step creating one snapshot
pub fn snapshot_workflow(runtime: &Runtime, snapshot_name: &str) -> Workflow {
    let mut workflow = runtime.workflow("snapshot-wf");
    workflow.project = PROJECT.to_string();
    workflow.zone = ZONE.to_string();
    workflow
        .add_step("snapshot", CreateSnapshots(vec![snapshot(snapshot_name)]))
        .unwrap();
    workflow
}

pub fn created_snapshots(provider: &InMemoryProvider) -> Vec<String> {
    provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CreateSnapshot { name, .. } => Some(name),
            _ => None,
        })
        .collect()
}
