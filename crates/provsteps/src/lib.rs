//! Step executors for machine images, snapshots and patch jobs
//!
//! Each executor implements [`StepAction`]. [`StepKind`] is the closed set
//! of step types a workflow definition can name.

mod await_patch_jobs;
mod create_machine_images;
mod create_snapshots;
mod execute_patch_jobs;
mod fanout;
mod machine_image;
mod patch_job;
mod resource;
mod snapshot;

pub use await_patch_jobs::{AwaitPatchJob, AwaitPatchJobs};
pub use create_machine_images::CreateMachineImages;
pub use create_snapshots::CreateSnapshots;
pub use execute_patch_jobs::ExecutePatchJobs;
pub use machine_image::MachineImage;
pub use patch_job::PatchJob;
pub use resource::ResourceMeta;
pub use snapshot::Snapshot;

use async_trait::async_trait;
use provcore::{StepAction, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};

/// The step types a workflow can contain. Serialized externally tagged,
/// e.g. `{"CreateSnapshots": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepKind {
    CreateMachineImages(CreateMachineImages),
    CreateSnapshots(CreateSnapshots),
    ExecutePatchJobs(ExecutePatchJobs),
    AwaitPatchJobs(AwaitPatchJobs),
}

impl StepKind {
    fn action(&self) -> &dyn StepAction {
        match self {
            StepKind::CreateMachineImages(s) => s,
            StepKind::CreateSnapshots(s) => s,
            StepKind::ExecutePatchJobs(s) => s,
            StepKind::AwaitPatchJobs(s) => s,
        }
    }

    fn action_mut(&mut self) -> &mut dyn StepAction {
        match self {
            StepKind::CreateMachineImages(s) => s,
            StepKind::CreateSnapshots(s) => s,
            StepKind::ExecutePatchJobs(s) => s,
            StepKind::AwaitPatchJobs(s) => s,
        }
    }
}

#[async_trait]
impl StepAction for StepKind {
    fn step_type(&self) -> &'static str {
        self.action().step_type()
    }

    async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        self.action_mut().populate(ctx).await
    }

    async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        self.action().validate(ctx).await
    }

    async fn run(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        self.action().run(ctx).await
    }
}

impl From<CreateMachineImages> for StepKind {
    fn from(step: CreateMachineImages) -> Self {
        StepKind::CreateMachineImages(step)
    }
}

impl From<CreateSnapshots> for StepKind {
    fn from(step: CreateSnapshots) -> Self {
        StepKind::CreateSnapshots(step)
    }
}

impl From<ExecutePatchJobs> for StepKind {
    fn from(step: ExecutePatchJobs) -> Self {
        StepKind::ExecutePatchJobs(step)
    }
}

impl From<AwaitPatchJobs> for StepKind {
    fn from(step: AwaitPatchJobs) -> Self {
        StepKind::AwaitPatchJobs(step)
    }
}
