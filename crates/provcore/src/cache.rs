use crate::api::{ComputeProvider, ProviderError};
use crate::{ResourceKind, WorkflowError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

type ProjectNames = Arc<OnceCell<HashSet<String>>>;

/// Names of resources of one kind that already exist in each project.
///
/// Only meant for validation: the first query for a project lists the
/// project once and the answer is kept for the lifetime of the cache. The
/// map lock is only held while fetching the per-project cell, so the
/// listing call itself happens outside of it.
pub struct ExistenceCache {
    kind: ResourceKind,
    projects: Mutex<HashMap<String, ProjectNames>>,
}

impl ExistenceCache {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub async fn exists(
        &self,
        provider: &dyn ComputeProvider,
        project: &str,
        name: &str,
    ) -> Result<bool, WorkflowError> {
        if name.is_empty() {
            return Err(WorkflowError::Validation(format!("must provide {} name", self.kind)));
        }

        let cell = {
            let mut projects = self.projects.lock().await;
            projects.entry(project.to_string()).or_default().clone()
        };

        let names = cell
            .get_or_try_init(|| async {
                tracing::debug!(kind = %self.kind, project, "listing existing resources");
                list_names(provider, self.kind, project).await
            })
            .await
            .map_err(|e| {
                WorkflowError::provider(format!("error listing {}s for project {:?}", self.kind, project), e)
            })?;

        Ok(names.contains(name))
    }
}

async fn list_names(
    provider: &dyn ComputeProvider,
    kind: ResourceKind,
    project: &str,
) -> Result<HashSet<String>, ProviderError> {
    let names: HashSet<String> = match kind {
        ResourceKind::Instance => provider
            .aggregated_list_instances(project, None)
            .await?
            .into_iter()
            .map(|i| i.name)
            .collect(),
        ResourceKind::Disk => provider
            .aggregated_list_disks(project)
            .await?
            .into_iter()
            .map(|d| d.name)
            .collect(),
        ResourceKind::MachineImage => provider
            .list_machine_images(project)
            .await?
            .into_iter()
            .map(|i| i.name)
            .collect(),
        ResourceKind::Snapshot => provider
            .list_snapshots(project)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect(),
        ResourceKind::PatchJob => HashSet::new(),
    };
    Ok(names)
}

/// Memoized project existence lookups
#[derive(Default)]
pub struct ProjectCache {
    projects: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
}

impl ProjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn exists(&self, provider: &dyn ComputeProvider, project: &str) -> Result<bool, WorkflowError> {
        let project = project.strip_prefix("projects/").unwrap_or(project);
        if project.is_empty() {
            return Err(WorkflowError::Validation("must provide project".to_string()));
        }

        let cell = {
            let mut projects = self.projects.lock().await;
            projects.entry(project.to_string()).or_default().clone()
        };
        let exists = cell
            .get_or_try_init(|| provider.project_exists(project))
            .await
            .map_err(|e| WorkflowError::provider(format!("bad project lookup {:?}", project), e))?;
        Ok(*exists)
    }
}
