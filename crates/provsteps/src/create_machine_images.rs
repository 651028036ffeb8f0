use crate::fanout::{join_workers, OnError};
use crate::machine_image::MachineImage;
use async_trait::async_trait;
use provcore::{ErrorList, StepAction, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::debug;

const STEP_TYPE: &str = "CreateMachineImages";

/// Creates machine images in parallel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateMachineImages(pub Vec<MachineImage>);

#[async_trait]
impl StepAction for CreateMachineImages {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for mi in &mut self.0 {
            errs.check(mi.populate(ctx));
        }
        errs.into_result()
    }

    async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for mi in &self.0 {
            errs.check(mi.validate(ctx).await);
        }
        errs.into_result()
    }

    async fn run(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut workers = JoinSet::new();
        for mi in &self.0 {
            let ctx = ctx.clone();
            let mi = mi.clone();
            workers.spawn(async move { create_machine_image(&ctx, mi).await });
        }

        let policy = ctx.workflow.settings.cancel.creation;
        join_workers(ctx, STEP_TYPE, workers, policy, OnError::Settle).await
    }
}

async fn create_machine_image(ctx: &StepContext, mut mi: MachineImage) -> Result<(), WorkflowError> {
    if ctx.is_cancelled() {
        debug!(step = %ctx.step, name = %mi.image.name, "cancelled before start");
        return Ok(());
    }

    let wf = &ctx.workflow;
    // Instances created earlier in the workflow are referenced by their link.
    if let Some(link) = wf.instances.resolve_link(&mi.image.source_instance).await {
        mi.image.source_instance = link;
    }

    let project = mi.resource.project.as_str();
    if mi.overwrite {
        if let Err(e) = wf.compute().delete_machine_image(project, &mi.image.name).await {
            if !e.is_not_found() {
                return Err(WorkflowError::provider(
                    format!("error deleting existing machine image {:?}", mi.image.name),
                    e,
                ));
            }
        }
    }

    ctx.info(STEP_TYPE, format!("Creating machine image {:?}.", mi.image.name));
    wf.compute()
        .create_machine_image(project, &mi.image)
        .await
        .map_err(|e| WorkflowError::provider(format!("error creating machine image {:?}", mi.image.name), e))?;

    wf.machine_images.mark_created(mi.resource.local_name()).await
}
