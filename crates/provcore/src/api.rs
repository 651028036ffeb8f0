//! Provider boundary
//!
//! Resource shapes and client traits for the cloud APIs the engine drives.
//! Transport and credentials live behind these traits; the engine only
//! distinguishes "not found" from every other failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{resource:?} was not found")]
    NotFound { resource: String },

    #[error("code: {code:?}, message: {message:?}, details: {details:?}")]
    Status {
        code: String,
        message: String,
        details: String,
    },

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ProviderError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub self_link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Disk {
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub self_link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MachineImage {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub source_instance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub source_disk: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub guest_flush: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchJobRequest {
    #[serde(default)]
    pub parent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Server-side view of a patch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchJob {
    pub name: String,
    pub state: PatchJobState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default)]
    pub percent_complete: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchJobState {
    StateUnspecified,
    Started,
    InstanceLookup,
    Patching,
    Succeeded,
    CompletedWithErrors,
    Canceled,
    TimedOut,
}

impl PatchJobState {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PatchJobState::CompletedWithErrors | PatchJobState::TimedOut | PatchJobState::Canceled
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == PatchJobState::Succeeded || self.is_failure()
    }
}

impl fmt::Display for PatchJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatchJobState::StateUnspecified => "STATE_UNSPECIFIED",
            PatchJobState::Started => "STARTED",
            PatchJobState::InstanceLookup => "INSTANCE_LOOKUP",
            PatchJobState::Patching => "PATCHING",
            PatchJobState::Succeeded => "SUCCEEDED",
            PatchJobState::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            PatchJobState::Canceled => "CANCELED",
            PatchJobState::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Compute API operations consumed by the engine
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn project_exists(&self, project: &str) -> Result<bool, ProviderError>;

    /// List instances across every zone of a project
    async fn aggregated_list_instances(
        &self,
        project: &str,
        filter: Option<&str>,
    ) -> Result<Vec<Instance>, ProviderError>;

    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<(), ProviderError>;

    /// List disks across every zone of a project
    async fn aggregated_list_disks(&self, project: &str) -> Result<Vec<Disk>, ProviderError>;

    async fn delete_disk(&self, project: &str, zone: &str, name: &str) -> Result<(), ProviderError>;

    async fn list_machine_images(&self, project: &str) -> Result<Vec<MachineImage>, ProviderError>;

    async fn create_machine_image(&self, project: &str, image: &MachineImage) -> Result<(), ProviderError>;

    async fn delete_machine_image(&self, project: &str, name: &str) -> Result<(), ProviderError>;

    async fn list_snapshots(&self, project: &str) -> Result<Vec<Snapshot>, ProviderError>;

    async fn create_snapshot(&self, project: &str, snapshot: &Snapshot) -> Result<(), ProviderError>;

    async fn delete_snapshot(&self, project: &str, name: &str) -> Result<(), ProviderError>;
}

/// Patch job API operations consumed by the engine
#[async_trait]
pub trait PatchClient: Send + Sync {
    async fn execute_patch_job(&self, request: &PatchJobRequest) -> Result<PatchJob, ProviderError>;

    async fn get_patch_job(&self, name: &str) -> Result<PatchJob, ProviderError>;
}

/// Establishes a patch client, optionally from a credentials file
#[async_trait]
pub trait PatchConnector: Send + Sync {
    async fn connect(&self, credentials: Option<&str>) -> Result<Arc<dyn PatchClient>, ProviderError>;
}
