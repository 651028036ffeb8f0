use crate::fanout::{join_workers, OnError};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use provcore::{ErrorList, StepAction, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::debug;

const STEP_TYPE: &str = "CreateSnapshots";

/// Creates disk snapshots in parallel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateSnapshots(pub Vec<Snapshot>);

#[async_trait]
impl StepAction for CreateSnapshots {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for sn in &mut self.0 {
            errs.check(sn.populate(ctx));
        }
        errs.into_result()
    }

    async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for sn in &self.0 {
            errs.check(sn.validate(ctx).await);
        }
        errs.into_result()
    }

    async fn run(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut workers = JoinSet::new();
        for sn in &self.0 {
            let ctx = ctx.clone();
            let sn = sn.clone();
            workers.spawn(async move { create_snapshot(&ctx, sn).await });
        }

        let policy = ctx.workflow.settings.cancel.creation;
        join_workers(ctx, STEP_TYPE, workers, policy, OnError::Settle).await
    }
}

async fn create_snapshot(ctx: &StepContext, mut sn: Snapshot) -> Result<(), WorkflowError> {
    if ctx.is_cancelled() {
        debug!(step = %ctx.step, name = %sn.snapshot.name, "cancelled before start");
        return Ok(());
    }

    let wf = &ctx.workflow;
    if let Some(link) = wf.disks.resolve_link(&sn.snapshot.source_disk).await {
        sn.snapshot.source_disk = link;
    }

    let project = sn.resource.project.as_str();
    if sn.overwrite {
        if let Err(e) = wf.compute().delete_snapshot(project, &sn.snapshot.name).await {
            if !e.is_not_found() {
                return Err(WorkflowError::provider(
                    format!("error deleting existing snapshot {:?}", sn.snapshot.name),
                    e,
                ));
            }
        }
    }

    ctx.info(STEP_TYPE, format!("Creating snapshot {:?}.", sn.snapshot.name));
    wf.compute()
        .create_snapshot(project, &sn.snapshot)
        .await
        .map_err(|e| WorkflowError::provider(format!("error creating snapshot {:?}", sn.snapshot.name), e))?;

    wf.snapshots.mark_created(sn.resource.local_name()).await
}
