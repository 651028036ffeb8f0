use crate::api::{ComputeProvider, PatchJob, PatchJobRequest};
use crate::{ErrorList, ExistenceCache, ResourceKind, StepGraph, WorkflowError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A registered name: its record, the step creating it and the steps using it
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub value: T,
    pub creator: Option<String>,
    pub users: Vec<String>,
}

/// Per-kind store enforcing creation and usage ordering for named resources.
///
/// A name has at most one creator, and every user of a created name must
/// transitively depend on its creator. All methods take the registry lock
/// only for the map operation itself.
pub struct Registry<T> {
    kind: ResourceKind,
    entries: Mutex<HashMap<String, Entry<T>>>,
}

impl<T: Clone + Send> Registry<T> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Register `creator` as the step creating `name`
    pub async fn reg_create(&self, name: &str, value: T, creator: &str) -> Result<(), WorkflowError> {
        let mut entries = self.entries.lock().await;
        let users = match entries.get(name) {
            Some(Entry {
                creator: Some(other), ..
            }) => {
                return Err(WorkflowError::DuplicateCreation {
                    kind: self.kind,
                    name: name.to_string(),
                    creator: other.clone(),
                });
            }
            Some(existing) => existing.users.clone(),
            None => Vec::new(),
        };

        debug!(kind = %self.kind, name, creator, "registered creation");
        entries.insert(
            name.to_string(),
            Entry {
                value,
                creator: Some(creator.to_string()),
                users,
            },
        );
        Ok(())
    }

    /// Register a name that exists outside of this workflow and record its user
    pub async fn reg_existing(&self, name: &str, value: T, user: &str) {
        let mut entries = self.entries.lock().await;
        entries
            .entry(name.to_string())
            .or_insert_with(|| Entry {
                value,
                creator: None,
                users: Vec::new(),
            })
            .users
            .push(user.to_string());
    }

    /// Record `user` as a user of `name`, enforcing the ordering invariant
    pub async fn reg_use(&self, name: &str, user: &str, graph: &StepGraph) -> Result<T, WorkflowError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(name).ok_or_else(|| WorkflowError::MissingReference {
            kind: self.kind,
            name: name.to_string(),
        })?;

        if let Some(creator) = &entry.creator {
            if !graph.nested_depends(user, creator) {
                return Err(WorkflowError::DependencyViolation {
                    kind: self.kind,
                    name: name.to_string(),
                    user: user.to_string(),
                    creator: creator.clone(),
                });
            }
        }

        entry.users.push(user.to_string());
        Ok(entry.value.clone())
    }

    pub async fn get(&self, name: &str) -> Option<T> {
        self.entries.lock().await.get(name).map(|e| e.value.clone())
    }

    pub async fn entry(&self, name: &str) -> Option<Entry<T>> {
        self.entries.lock().await.get(name).cloned()
    }

    /// Mutate the record registered under `name`
    pub async fn update<F>(&self, name: &str, f: F) -> Result<(), WorkflowError>
    where
        F: FnOnce(&mut T),
    {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(name).ok_or_else(|| WorkflowError::MissingReference {
            kind: self.kind,
            name: name.to_string(),
        })?;
        f(&mut entry.value);
        Ok(())
    }

    /// All entries, sorted by name
    pub async fn entries(&self) -> Vec<(String, Entry<T>)> {
        let entries = self.entries.lock().await;
        let mut all: Vec<_> = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Registry record for a cloud resource
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resource {
    pub real_name: String,
    pub project: String,
    pub link: String,
    pub no_cleanup: bool,
    pub created: bool,
    pub deleted: bool,
}

/// Registry record for a patch job; `job` is filled in once executed
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatchJobRecord {
    pub request: PatchJobRequest,
    pub job: Option<PatchJob>,
}

/// Registry for a cloud resource kind, backed by the provider for
/// pre-existing resources and deletion.
pub struct ResourceRegistry {
    registry: Registry<Resource>,
    cache: ExistenceCache,
    compute: Arc<dyn ComputeProvider>,
}

impl ResourceRegistry {
    pub fn new(kind: ResourceKind, compute: Arc<dyn ComputeProvider>) -> Self {
        Self {
            registry: Registry::new(kind),
            cache: ExistenceCache::new(kind),
            compute,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.registry.kind()
    }

    /// Register the creation of `name`. Unless `overwrite` is set, a
    /// resource with the same real name already present in the project is
    /// rejected.
    pub async fn reg_create(
        &self,
        name: &str,
        resource: Resource,
        creator: &str,
        overwrite: bool,
    ) -> Result<(), WorkflowError> {
        if let Some(Entry { creator: Some(other), .. }) = self.registry.entry(name).await {
            return Err(WorkflowError::DuplicateCreation {
                kind: self.kind(),
                name: name.to_string(),
                creator: other,
            });
        }

        if !overwrite
            && self
                .cache
                .exists(self.compute.as_ref(), &resource.project, &resource.real_name)
                .await?
        {
            return Err(WorkflowError::AlreadyExists {
                kind: self.kind(),
                name: resource.real_name,
                project: resource.project,
            });
        }

        self.registry.reg_create(name, resource, creator).await
    }

    /// Register `user` as using `name`. Names in URL form refer to
    /// resources that must already exist in the cloud.
    pub async fn reg_use(&self, name: &str, user: &str, graph: &StepGraph) -> Result<Resource, WorkflowError> {
        if self.kind().matches_url(name) {
            return self.reg_url(name, user).await;
        }
        self.registry.reg_use(name, user, graph).await
    }

    async fn reg_url(&self, url: &str, user: &str) -> Result<Resource, WorkflowError> {
        if let Some(existing) = self.registry.get(url).await {
            self.registry.reg_existing(url, existing.clone(), user).await;
            return Ok(existing);
        }

        let parsed = self
            .kind()
            .parse_url(url)
            .ok_or_else(|| WorkflowError::Validation(format!("invalid {} URL {:?}", self.kind(), url)))?;
        let project = parsed
            .project
            .ok_or_else(|| WorkflowError::Validation(format!("{} URL {:?} has no project", self.kind(), url)))?;

        if !self.cache.exists(self.compute.as_ref(), &project, &parsed.name).await? {
            return Err(WorkflowError::ResourceDoesNotExist {
                kind: self.kind(),
                name: url.to_string(),
            });
        }

        let resource = Resource {
            real_name: parsed.name,
            project,
            link: url.to_string(),
            no_cleanup: true,
            created: false,
            deleted: false,
        };
        self.registry.reg_existing(url, resource.clone(), user).await;
        Ok(resource)
    }

    pub async fn get(&self, name: &str) -> Option<Resource> {
        self.registry.get(name).await
    }

    pub async fn entry(&self, name: &str) -> Option<Entry<Resource>> {
        self.registry.entry(name).await
    }

    pub async fn entries(&self) -> Vec<(String, Entry<Resource>)> {
        self.registry.entries().await
    }

    /// Cloud link for a workflow-local name, if registered
    pub async fn resolve_link(&self, name: &str) -> Option<String> {
        self.registry.get(name).await.map(|r| r.link)
    }

    pub async fn mark_created(&self, name: &str) -> Result<(), WorkflowError> {
        self.registry.update(name, |r| r.created = true).await
    }

    /// Delete the cloud resource registered under `name`
    pub async fn delete(&self, name: &str) -> Result<(), WorkflowError> {
        let resource = self.registry.get(name).await.ok_or_else(|| WorkflowError::MissingReference {
            kind: self.kind(),
            name: name.to_string(),
        })?;

        let result = self.delete_fn(&resource).await;
        if result.is_ok() || result.as_ref().is_err_and(WorkflowError::is_resource_dne) {
            self.registry.update(name, |r| r.deleted = true).await?;
        }
        result
    }

    async fn delete_fn(&self, resource: &Resource) -> Result<(), WorkflowError> {
        let kind = self.kind();
        let url = kind
            .parse_url(&resource.link)
            .ok_or_else(|| WorkflowError::Validation(format!("invalid {} link {:?}", kind, resource.link)))?;
        let project = url.project.as_deref().unwrap_or(&resource.project);
        let zone = url.zone.as_deref().unwrap_or_default();

        let result = match kind {
            ResourceKind::Instance => self.compute.delete_instance(project, zone, &url.name).await,
            ResourceKind::Disk => self.compute.delete_disk(project, zone, &url.name).await,
            ResourceKind::MachineImage => self.compute.delete_machine_image(project, &url.name).await,
            ResourceKind::Snapshot => self.compute.delete_snapshot(project, &url.name).await,
            ResourceKind::PatchJob => {
                return Err(WorkflowError::Execution("PatchJob resources cannot be deleted".to_string()));
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(WorkflowError::ResourceDoesNotExist {
                kind,
                name: resource.link.clone(),
            }),
            Err(e) => Err(WorkflowError::provider(format!("error deleting {} {:?}", kind, resource.link), e)),
        }
    }

    /// Delete every resource created by the workflow that is not marked
    /// `no_cleanup`. Resources that are already gone are not an error.
    pub async fn cleanup(&self) -> ErrorList {
        let mut errs = ErrorList::new();
        for (name, entry) in self.registry.entries().await {
            let res = &entry.value;
            if entry.creator.is_none() || !res.created || res.no_cleanup || res.deleted {
                continue;
            }
            info!(kind = %self.kind(), link = %res.link, "deleting created resource");
            match self.delete(&name).await {
                Ok(()) => {}
                Err(e) if e.is_resource_dne() => debug!(kind = %self.kind(), name, "already deleted"),
                Err(e) => errs.push(e),
            }
        }
        errs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, InMemoryProvider};

    const PROJECT: &str = "registry-project";
    const ZONE: &str = "us-central1-a";

    #[tokio::test]
    async fn test_delete_existing_instance_and_disk() {
        let provider = InMemoryProvider::new()
            .with_instance(PROJECT, ZONE, "vm")
            .with_disk(PROJECT, ZONE, "data");
        let compute: Arc<dyn ComputeProvider> = Arc::new(provider.clone());
        let graph = StepGraph::new();

        for (kind, url) in [
            (ResourceKind::Instance, format!("projects/{PROJECT}/zones/{ZONE}/instances/vm")),
            (ResourceKind::Disk, format!("projects/{PROJECT}/zones/{ZONE}/disks/data")),
        ] {
            let registry = ResourceRegistry::new(kind, compute.clone());
            registry.reg_use(&url, "teardown", &graph).await.unwrap();

            assert!(registry.cleanup().await.is_empty(), "pre-existing {kind} is never cleaned up");
            registry.delete(&url).await.unwrap();
            assert!(registry.get(&url).await.unwrap().deleted);

            let err = registry.delete(&url).await.unwrap_err();
            assert!(err.is_resource_dne(), "got: {}", err);
        }

        let deletes: Vec<Call> = provider
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::DeleteInstance { .. } | Call::DeleteDisk { .. }))
            .collect();
        let instance = Call::DeleteInstance {
            project: PROJECT.to_string(),
            name: "vm".to_string(),
        };
        let disk = Call::DeleteDisk {
            project: PROJECT.to_string(),
            name: "data".to_string(),
        };
        assert_eq!(deletes, vec![instance.clone(), instance, disk.clone(), disk]);
    }

    #[tokio::test]
    async fn test_delete_unregistered_name() {
        let compute: Arc<dyn ComputeProvider> = Arc::new(InMemoryProvider::new().with_project(PROJECT));
        let registry = ResourceRegistry::new(ResourceKind::Disk, compute);

        let err = registry.delete("scratch").await.unwrap_err();
        assert!(matches!(err, WorkflowError::MissingReference { .. }), "got: {}", err);
    }
}
