use crate::fanout::{join_workers, OnError};
use async_trait::async_trait;
use provcore::api::{PatchClient, PatchJobState};
use provcore::{parse_duration, ErrorList, ResourceKind, StepAction, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant};
use tracing::debug;

const STEP_TYPE: &str = "AwaitPatchJobs";

/// A patch job to wait for, by workflow-local name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwaitPatchJob {
    pub name: String,
    /// Polling interval, e.g. "10s". Defaults to the workflow setting.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interval: String,
    #[serde(skip)]
    period: Duration,
}

impl AwaitPatchJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    /// Parsed polling interval, set by populate
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Polls executed patch jobs until each reaches a terminal state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AwaitPatchJobs(pub Vec<AwaitPatchJob>);

#[async_trait]
impl StepAction for AwaitPatchJobs {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        for aj in &mut self.0 {
            aj.name = ctx.workflow.substitute(&aj.name);
            if aj.interval.is_empty() {
                aj.period = ctx.workflow.settings.default_poll_interval;
                aj.interval = format!("{:?}", aj.period);
                continue;
            }
            match parse_duration(&aj.interval) {
                Ok(d) if d.is_zero() => errs.push(WorkflowError::Validation(format!(
                    "PatchJob {:?}: polling interval must be positive, got {:?}",
                    aj.name, aj.interval
                ))),
                Ok(d) => aj.period = d,
                Err(e) => errs.push(e),
            }
        }
        errs.into_result()
    }

    async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let wf = &ctx.workflow;
        let mut errs = ErrorList::new();
        for aj in &self.0 {
            errs.check(wf.patch_jobs.reg_use(&aj.name, &ctx.step, &wf.graph).await);
        }
        errs.into_result()
    }

    async fn run(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let client = ctx.workflow.patch_client()?;

        let mut workers = JoinSet::new();
        for aj in &self.0 {
            let ctx = ctx.clone();
            let client = client.clone();
            let aj = aj.clone();
            workers.spawn(async move { await_patch_job(&ctx, client, aj).await });
        }

        let policy = ctx.workflow.settings.cancel.polling;
        join_workers(ctx, STEP_TYPE, workers, policy, OnError::Return).await
    }
}

async fn await_patch_job(
    ctx: &StepContext,
    client: Arc<dyn PatchClient>,
    aj: AwaitPatchJob,
) -> Result<(), WorkflowError> {
    let wf = &ctx.workflow;
    let record = wf.patch_jobs.get(&aj.name).await.ok_or_else(|| WorkflowError::MissingReference {
        kind: ResourceKind::PatchJob,
        name: aj.name.clone(),
    })?;
    let job_name = record
        .job
        .map(|j| j.name)
        .ok_or_else(|| WorkflowError::Execution(format!("PatchJob {:?} has not been executed", aj.name)))?;

    ctx.info(STEP_TYPE, format!("Waiting for PatchJob {:?} ({}).", aj.name, job_name));

    let mut ticker = interval_at(Instant::now() + aj.period, aj.period);
    loop {
        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                debug!(step = %ctx.step, job = %job_name, "cancelled while polling");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let job = client
            .get_patch_job(&job_name)
            .await
            .map_err(|e| WorkflowError::provider(format!("error while fetching patch job {:?}", job_name), e))?;

        let state = job.state;
        let message = job.error_message.clone();
        debug!(step = %ctx.step, job = %job_name, %state, percent = job.percent_complete, "polled PatchJob");
        wf.patch_jobs.update(&aj.name, |r| r.job = Some(job)).await?;

        if state.is_failure() {
            return Err(WorkflowError::JobFailed {
                job: job_name,
                state,
                message,
            });
        }
        if state == PatchJobState::Succeeded {
            ctx.info(STEP_TYPE, format!("PatchJob {:?} succeeded.", aj.name));
            return Ok(());
        }
    }
}
