use provcore::{is_rfc1035, ErrorList, Resource, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};

/// Workflow bookkeeping shared by every created resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceMeta {
    /// Project to create the resource in, defaults to the workflow project
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    /// Use the name as given instead of generating a unique one
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exact_name: bool,
    /// Keep the resource when the workflow cleans up
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_cleanup: bool,
    #[serde(default, skip_deserializing, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(skip)]
    local_name: String,
}

impl ResourceMeta {
    /// Name the resource is registered under within the workflow
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Record the workflow-local name, default the project and return the
    /// real name to create the resource with.
    pub(crate) fn populate(&mut self, ctx: &StepContext, name: &str) -> Result<String, WorkflowError> {
        let wf = &ctx.workflow;
        let name = wf.substitute(name);
        if name.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "step {:?}: resource must have a Name",
                ctx.step
            )));
        }
        self.local_name = name.clone();
        self.project = if self.project.is_empty() {
            wf.meta.project.clone()
        } else {
            wf.substitute(&self.project)
        };

        Ok(if self.exact_name { name } else { wf.gen_name(&name) })
    }

    pub(crate) async fn validate(&self, ctx: &StepContext, real_name: &str, prefix: &str) -> ErrorList {
        let mut errs = ErrorList::new();
        if !is_rfc1035(real_name) {
            errs.push(WorkflowError::Validation(format!(
                "{}: bad name {:?}, must conform to RFC 1035",
                prefix, real_name
            )));
        }
        match ctx.workflow.project_exists(&self.project).await {
            Ok(true) => {}
            Ok(false) => errs.push(WorkflowError::Validation(format!(
                "{}: project {:?} does not exist",
                prefix, self.project
            ))),
            Err(e) => errs.push(e),
        }
        errs
    }

    pub(crate) fn record(&self, real_name: &str) -> Resource {
        Resource {
            real_name: real_name.to_string(),
            project: self.project.clone(),
            link: self.link.clone(),
            no_cleanup: self.no_cleanup,
            created: false,
            deleted: false,
        }
    }
}
