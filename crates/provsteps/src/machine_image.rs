use crate::resource::ResourceMeta;
use provcore::{api, extend_partial_url, ErrorList, ResourceKind, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};

/// A machine image to create from a source instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineImage {
    #[serde(flatten)]
    pub image: api::MachineImage,

    #[serde(flatten)]
    pub resource: ResourceMeta,

    /// Delete an existing machine image of the same name before creating.
    /// Without it, a name collision fails validation.
    #[serde(default, rename = "OverWrite", skip_serializing_if = "std::ops::Not::not")]
    pub overwrite: bool,
}

impl MachineImage {
    pub fn new(name: impl Into<String>, source_instance: impl Into<String>) -> Self {
        Self {
            image: api::MachineImage {
                name: name.into(),
                source_instance: source_instance.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub(crate) fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        let wf = &ctx.workflow;

        if let Some(real_name) = errs.check(self.resource.populate(ctx, &self.image.name)) {
            self.image.name = real_name;
        }

        self.image.description = if self.image.description.is_empty() {
            format!(
                "Machine image created by provflow in workflow {:?} on behalf of {}.",
                wf.meta.name, wf.meta.username
            )
        } else {
            wf.substitute(&self.image.description)
        };

        self.image.source_instance = wf.substitute(&self.image.source_instance);
        if ResourceKind::Instance.matches_url(&self.image.source_instance) {
            self.image.source_instance = extend_partial_url(&self.image.source_instance, &self.resource.project);
        }

        self.resource.link = format!(
            "projects/{}/global/machineImages/{}",
            self.resource.project, self.image.name
        );
        errs.into_result()
    }

    pub(crate) async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let wf = &ctx.workflow;
        let prefix = format!("cannot create machine image {:?}", self.resource.local_name());
        let mut errs = self.resource.validate(ctx, &self.image.name, &prefix).await;

        if self.image.source_instance.is_empty() {
            errs.push(WorkflowError::Validation(format!("{}: must provide SourceInstance", prefix)));
            return errs.into_result();
        }

        if let Err(e) = wf.instances.reg_use(&self.image.source_instance, &ctx.step, &wf.graph).await {
            errs.push(e);
            return errs.into_result();
        }

        errs.check(
            wf.machine_images
                .reg_create(
                    self.resource.local_name(),
                    self.resource.record(&self.image.name),
                    &ctx.step,
                    self.overwrite,
                )
                .await,
        );
        errs.into_result()
    }
}
