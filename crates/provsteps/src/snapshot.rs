use crate::resource::ResourceMeta;
use provcore::{api, extend_partial_url, ErrorList, ResourceKind, StepContext, WorkflowError};
use serde::{Deserialize, Serialize};

/// A disk snapshot to create
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    #[serde(flatten)]
    pub snapshot: api::Snapshot,

    #[serde(flatten)]
    pub resource: ResourceMeta,

    /// Delete an existing snapshot of the same name before creating.
    #[serde(default, rename = "OverWrite", skip_serializing_if = "std::ops::Not::not")]
    pub overwrite: bool,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, source_disk: impl Into<String>) -> Self {
        Self {
            snapshot: api::Snapshot {
                name: name.into(),
                source_disk: source_disk.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub(crate) fn populate(&mut self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let mut errs = ErrorList::new();
        let wf = &ctx.workflow;

        if let Some(real_name) = errs.check(self.resource.populate(ctx, &self.snapshot.name)) {
            self.snapshot.name = real_name;
        }

        self.snapshot.description = if self.snapshot.description.is_empty() {
            format!(
                "Snapshot created by provflow in workflow {:?} on behalf of {}.",
                wf.meta.name, wf.meta.username
            )
        } else {
            wf.substitute(&self.snapshot.description)
        };

        self.snapshot.source_disk = wf.substitute(&self.snapshot.source_disk);
        if ResourceKind::Disk.matches_url(&self.snapshot.source_disk) {
            self.snapshot.source_disk = extend_partial_url(&self.snapshot.source_disk, &self.resource.project);
        }

        self.resource.link = format!("projects/{}/global/snapshots/{}", self.resource.project, self.snapshot.name);
        errs.into_result()
    }

    pub(crate) async fn validate(&self, ctx: &StepContext) -> Result<(), WorkflowError> {
        let wf = &ctx.workflow;
        let prefix = format!("cannot create snapshot {:?}", self.resource.local_name());
        let mut errs = self.resource.validate(ctx, &self.snapshot.name, &prefix).await;

        if self.snapshot.source_disk.is_empty() {
            errs.push(WorkflowError::Validation(format!("{}: must provide SourceDisk", prefix)));
            return errs.into_result();
        }

        if let Err(e) = wf.disks.reg_use(&self.snapshot.source_disk, &ctx.step, &wf.graph).await {
            errs.push(e);
            return errs.into_result();
        }

        errs.check(
            wf.snapshots
                .reg_create(
                    self.resource.local_name(),
                    self.resource.record(&self.snapshot.name),
                    &ctx.step,
                    self.overwrite,
                )
                .await,
        );
        errs.into_result()
    }
}
