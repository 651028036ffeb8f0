use provcore::api::PatchJobRequest;
use provcore::{ErrorList, PatchJobRecord, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};

/// A patch job to start on the instances matched by its filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchJob {
    /// Workflow-local name, referenced by AwaitPatchJobs
    pub name: String,

    #[serde(flatten)]
    pub request: PatchJobRequest,
}

impl PatchJob {
    pub fn new(name: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: PatchJobRequest {
                filter: filter.into(),
                ..Default::default()
            },
        }
    }

    pub(crate) async fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let wf = &ctx.workflow;
        let mut errs = ErrorList::new();
        errs.check(wf.connect_patch_client().await);

        self.name = wf.substitute(&self.name);

        let parent = if self.request.parent.is_empty() {
            wf.meta.project.clone()
        } else {
            wf.substitute(&self.request.parent)
        };
        self.request.parent = if parent.starts_with("projects/") {
            parent
        } else {
            format!("projects/{}", parent)
        };

        self.request.description = if self.request.description.is_empty() {
            format!(
                "PatchJob created by provflow in workflow {:?} on behalf of {}.",
                wf.meta.name, wf.meta.username
            )
        } else {
            wf.substitute(&self.request.description)
        };
        self.request.filter = wf.substitute(&self.request.filter);

        errs.into_result()
    }

    pub(crate) async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let wf = &ctx.workflow;
        if self.name.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "step {:?}: PatchJob must have a Name",
                ctx.step
            )));
        }

        match wf.project_exists(&self.request.parent).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(WorkflowError::Validation(format!(
                    "cannot create PatchJob {:?}: project {:?} does not exist",
                    self.name, self.request.parent
                )));
            }
            Err(e) => {
                return Err(WorkflowError::Validation(format!(
                    "cannot create PatchJob {:?}: {}",
                    self.name, e
                )));
            }
        }

        let record = PatchJobRecord {
            request: self.request.clone(),
            job: None,
        };
        wf.patch_jobs.reg_create(&self.name, record, &ctx.step).await
    }
}
