//! In-memory provider
//!
//! A stateful stand-in for the compute and patch APIs. It backs the
//! simulation mode of the CLI and the test suites: projects and resources
//! can be seeded from a [`Fixture`], every call is recorded, failures can be
//! injected per operation and patch jobs follow scripted state sequences.

use crate::api::{
    ComputeProvider, Disk, Instance, MachineImage, PatchClient, PatchConnector, PatchJob, PatchJobRequest,
    PatchJobState, ProviderError, Snapshot,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Seed data for an [`InMemoryProvider`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Fixture {
    #[serde(default)]
    pub projects: Vec<ProjectFixture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectFixture {
    pub name: String,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub machine_images: Vec<MachineImage>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

/// A recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ProjectExists { project: String },
    ListInstances { project: String },
    ListDisks { project: String },
    ListMachineImages { project: String },
    ListSnapshots { project: String },
    DeleteInstance { project: String, name: String },
    DeleteDisk { project: String, name: String },
    CreateMachineImage { project: String, name: String },
    DeleteMachineImage { project: String, name: String },
    CreateSnapshot { project: String, name: String },
    DeleteSnapshot { project: String, name: String },
    Connect,
    ExecutePatchJob { parent: String },
    GetPatchJob { name: String },
}

#[derive(Default)]
struct ProjectState {
    instances: Vec<Instance>,
    disks: Vec<Disk>,
    machine_images: BTreeMap<String, MachineImage>,
    snapshots: BTreeMap<String, Snapshot>,
}

struct JobState {
    job: PatchJob,
    script: VecDeque<(PatchJobState, String)>,
}

#[derive(Default)]
struct State {
    projects: HashMap<String, ProjectState>,
    calls: Vec<Call>,
    failures: HashMap<String, ProviderError>,
    scripts: VecDeque<Vec<(PatchJobState, String)>>,
    jobs: HashMap<String, JobState>,
    job_counter: usize,
    connect_failure: Option<ProviderError>,
}

#[derive(Clone, Default)]
pub struct InMemoryProvider {
    state: Arc<Mutex<State>>,
    create_delay: Option<Duration>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let provider = Self::new();
        for project in fixture.projects {
            let name = project.name.clone();
            let mut provider_state = provider.state();
            let state = provider_state.projects.entry(name.clone()).or_default();
            for mut i in project.instances {
                if i.self_link.is_empty() {
                    i.self_link = format!("projects/{}/zones/{}/instances/{}", name, i.zone, i.name);
                }
                state.instances.push(i);
            }
            for mut d in project.disks {
                if d.self_link.is_empty() {
                    d.self_link = format!("projects/{}/zones/{}/disks/{}", name, d.zone, d.name);
                }
                state.disks.push(d);
            }
            for mi in project.machine_images {
                state.machine_images.insert(mi.name.clone(), mi);
            }
            for s in project.snapshots {
                state.snapshots.insert(s.name.clone(), s);
            }
        }
        provider
    }

    pub fn with_project(self, project: &str) -> Self {
        self.state().projects.entry(project.to_string()).or_default();
        self
    }

    pub fn with_instance(self, project: &str, zone: &str, name: &str) -> Self {
        {
            let mut state = self.state();
            let count = state.projects.values().map(|p| p.instances.len() as u64).sum::<u64>();
            state.projects.entry(project.to_string()).or_default().instances.push(Instance {
                name: name.to_string(),
                id: 1000 + count,
                zone: zone.to_string(),
                self_link: format!("projects/{}/zones/{}/instances/{}", project, zone, name),
            });
        }
        self
    }

    pub fn with_disk(self, project: &str, zone: &str, name: &str) -> Self {
        self.state().projects.entry(project.to_string()).or_default().disks.push(Disk {
            name: name.to_string(),
            zone: zone.to_string(),
            self_link: format!("projects/{}/zones/{}/disks/{}", project, zone, name),
        });
        self
    }

    pub fn with_machine_image(self, project: &str, name: &str) -> Self {
        self.state()
            .projects
            .entry(project.to_string())
            .or_default()
            .machine_images
            .insert(name.to_string(), MachineImage {
                name: name.to_string(),
                ..Default::default()
            });
        self
    }

    pub fn with_snapshot(self, project: &str, name: &str) -> Self {
        self.state()
            .projects
            .entry(project.to_string())
            .or_default()
            .snapshots
            .insert(name.to_string(), Snapshot {
                name: name.to_string(),
                ..Default::default()
            });
        self
    }

    /// Make every create call take `delay` before it completes
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Make `connect` fail with `err`
    pub fn with_connect_failure(self, err: ProviderError) -> Self {
        self.state().connect_failure = Some(err);
        self
    }

    /// Fail the next calls of `op` (e.g. "create_snapshot") on `name`; `*` matches any name
    pub fn fail_on(&self, op: &str, name: &str, err: ProviderError) {
        self.state().failures.insert(format!("{}:{}", op, name), err);
    }

    /// States reported by the next executed patch job, one per status fetch.
    /// The last state repeats once the script runs out.
    pub fn script_patch_job(&self, states: Vec<(PatchJobState, &str)>) {
        let script = states.into_iter().map(|(s, m)| (s, m.to_string())).collect();
        self.state().scripts.push_back(script);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn machine_images(&self, project: &str) -> Vec<String> {
        self.state()
            .projects
            .get(project)
            .map(|p| p.machine_images.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshots(&self, project: &str) -> Vec<Snapshot> {
        self.state()
            .projects
            .get(project)
            .map(|p| p.snapshots.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn patch_job(&self, name: &str) -> Option<PatchJob> {
        self.state().jobs.get(name).map(|j| j.job.clone())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call, op: &str, name: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(call);
        let specific = format!("{}:{}", op, name);
        let any = format!("{}:*", op);
        match state.failures.get(&specific).or_else(|| state.failures.get(&any)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn project<T>(&self, project: &str, f: impl FnOnce(&mut ProjectState) -> T) -> Result<T, ProviderError> {
        let mut state = self.state();
        let project_state = state
            .projects
            .get_mut(project)
            .ok_or_else(|| ProviderError::not_found(format!("projects/{}", project)))?;
        Ok(f(project_state))
    }

    async fn create_pause(&self) {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ComputeProvider for InMemoryProvider {
    async fn project_exists(&self, project: &str) -> Result<bool, ProviderError> {
        self.record(Call::ProjectExists { project: project.to_string() }, "project_exists", project)?;
        Ok(self.state().projects.contains_key(project))
    }

    async fn aggregated_list_instances(
        &self,
        project: &str,
        filter: Option<&str>,
    ) -> Result<Vec<Instance>, ProviderError> {
        self.record(Call::ListInstances { project: project.to_string() }, "list_instances", project)?;
        let instances = self.project(project, |p| p.instances.clone())?;
        Ok(match filter {
            Some(f) if !f.is_empty() => instances.into_iter().filter(|i| i.name.contains(f)).collect(),
            _ => instances,
        })
    }

    async fn delete_instance(&self, project: &str, _zone: &str, name: &str) -> Result<(), ProviderError> {
        self.record(
            Call::DeleteInstance { project: project.to_string(), name: name.to_string() },
            "delete_instance",
            name,
        )?;
        let removed = self.project(project, |p| {
            let before = p.instances.len();
            p.instances.retain(|i| i.name != name);
            before != p.instances.len()
        })?;
        removed.then_some(()).ok_or_else(|| ProviderError::not_found(name))
    }

    async fn aggregated_list_disks(&self, project: &str) -> Result<Vec<Disk>, ProviderError> {
        self.record(Call::ListDisks { project: project.to_string() }, "list_disks", project)?;
        self.project(project, |p| p.disks.clone())
    }

    async fn delete_disk(&self, project: &str, _zone: &str, name: &str) -> Result<(), ProviderError> {
        self.record(
            Call::DeleteDisk { project: project.to_string(), name: name.to_string() },
            "delete_disk",
            name,
        )?;
        let removed = self.project(project, |p| {
            let before = p.disks.len();
            p.disks.retain(|d| d.name != name);
            before != p.disks.len()
        })?;
        removed.then_some(()).ok_or_else(|| ProviderError::not_found(name))
    }

    async fn list_machine_images(&self, project: &str) -> Result<Vec<MachineImage>, ProviderError> {
        self.record(Call::ListMachineImages { project: project.to_string() }, "list_machine_images", project)?;
        self.project(project, |p| p.machine_images.values().cloned().collect())
    }

    async fn create_machine_image(&self, project: &str, image: &MachineImage) -> Result<(), ProviderError> {
        self.record(
            Call::CreateMachineImage { project: project.to_string(), name: image.name.clone() },
            "create_machine_image",
            &image.name,
        )?;
        self.create_pause().await;
        self.project(project, |p| {
            if p.machine_images.contains_key(&image.name) {
                return Err(ProviderError::Status {
                    code: "409".to_string(),
                    message: format!("machine image {:?} already exists", image.name),
                    details: String::new(),
                });
            }
            p.machine_images.insert(image.name.clone(), image.clone());
            Ok(())
        })?
    }

    async fn delete_machine_image(&self, project: &str, name: &str) -> Result<(), ProviderError> {
        self.record(
            Call::DeleteMachineImage { project: project.to_string(), name: name.to_string() },
            "delete_machine_image",
            name,
        )?;
        self.project(project, |p| p.machine_images.remove(name))?
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(name))
    }

    async fn list_snapshots(&self, project: &str) -> Result<Vec<Snapshot>, ProviderError> {
        self.record(Call::ListSnapshots { project: project.to_string() }, "list_snapshots", project)?;
        self.project(project, |p| p.snapshots.values().cloned().collect())
    }

    async fn create_snapshot(&self, project: &str, snapshot: &Snapshot) -> Result<(), ProviderError> {
        self.record(
            Call::CreateSnapshot { project: project.to_string(), name: snapshot.name.clone() },
            "create_snapshot",
            &snapshot.name,
        )?;
        self.create_pause().await;
        self.project(project, |p| {
            if p.snapshots.contains_key(&snapshot.name) {
                return Err(ProviderError::Status {
                    code: "409".to_string(),
                    message: format!("snapshot {:?} already exists", snapshot.name),
                    details: String::new(),
                });
            }
            p.snapshots.insert(snapshot.name.clone(), snapshot.clone());
            Ok(())
        })?
    }

    async fn delete_snapshot(&self, project: &str, name: &str) -> Result<(), ProviderError> {
        self.record(
            Call::DeleteSnapshot { project: project.to_string(), name: name.to_string() },
            "delete_snapshot",
            name,
        )?;
        self.project(project, |p| p.snapshots.remove(name))?
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(name))
    }
}

#[async_trait]
impl PatchClient for InMemoryProvider {
    async fn execute_patch_job(&self, request: &PatchJobRequest) -> Result<PatchJob, ProviderError> {
        self.record(
            Call::ExecutePatchJob { parent: request.parent.clone() },
            "execute_patch_job",
            &request.parent,
        )?;
        let mut state = self.state();
        state.job_counter += 1;
        let name = format!("{}/patchJobs/job-{}", request.parent, state.job_counter);
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| vec![(PatchJobState::Succeeded, String::new())]);
        let job = PatchJob {
            name: name.clone(),
            state: PatchJobState::Started,
            error_message: String::new(),
            percent_complete: 0.0,
        };
        state.jobs.insert(name, JobState {
            job: job.clone(),
            script: script.into(),
        });
        Ok(job)
    }

    async fn get_patch_job(&self, name: &str) -> Result<PatchJob, ProviderError> {
        self.record(Call::GetPatchJob { name: name.to_string() }, "get_patch_job", name)?;
        let mut state = self.state();
        let job = state.jobs.get_mut(name).ok_or_else(|| ProviderError::not_found(name))?;
        let next = if job.script.len() > 1 {
            job.script.pop_front()
        } else {
            job.script.front().cloned()
        };
        if let Some((s, message)) = next {
            job.job.state = s;
            job.job.error_message = message;
            if s.is_terminal() {
                job.job.percent_complete = 100.0;
            }
        }
        Ok(job.job.clone())
    }
}

#[async_trait]
impl PatchConnector for InMemoryProvider {
    async fn connect(&self, _credentials: Option<&str>) -> Result<Arc<dyn PatchClient>, ProviderError> {
        let mut state = self.state();
        state.calls.push(Call::Connect);
        if let Some(err) = state.connect_failure.clone() {
            return Err(err);
        }
        Ok(Arc::new(self.clone()))
    }
}
