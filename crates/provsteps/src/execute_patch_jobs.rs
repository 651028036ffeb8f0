use crate::patch_job::PatchJob;
use async_trait::async_trait;
use provcore::{ErrorList, StepAction, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};
use tracing::debug;

const STEP_TYPE: &str = "ExecutePatchJobs";

/// Starts patch jobs one after another. The first failure stops the step;
/// jobs after it are not started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutePatchJobs(pub Vec<PatchJob>);

#[async_trait]
impl StepAction for ExecutePatchJobs {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for pj in &mut self.0 {
            errs.check(pj.populate(ctx).await);
        }
        errs.into_result()
    }

    async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for pj in &self.0 {
            errs.check(pj.validate(ctx).await);
        }
        errs.into_result()
    }

    async fn run(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let client = ctx.workflow.patch_client()?;

        for pj in &self.0 {
            if ctx.is_cancelled() {
                debug!(step = %ctx.step, name = %pj.name, "cancelled, not starting remaining jobs");
                return Ok(());
            }

            ctx.info(STEP_TYPE, format!("Executing PatchJob {:?}.", pj.name));
            let job = client
                .execute_patch_job(&pj.request)
                .await
                .map_err(|e| WorkflowError::provider(format!("error executing PatchJob {:?}", pj.name), e))?;

            ctx.info(STEP_TYPE, format!("PatchJob {:?} started as {:?}.", pj.name, job.name));
            ctx.workflow.patch_jobs.update(&pj.name, |r| r.job = Some(job)).await?;
        }
        Ok(())
    }
}
