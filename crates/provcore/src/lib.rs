//! Core abstractions for the provisioning engine
//!
//! This crate provides the step graph, the resource registries, the
//! existence caches and the provider boundary that step executors and the
//! runtime depend on. It knows nothing about concrete step types.

pub mod api;
mod cache;
mod context;
mod duration;
mod error;
pub mod events;
mod graph;
pub mod memory;
mod registry;
mod resource;

pub use api::{ComputeProvider, PatchClient, PatchConnector, PatchJobState, ProviderError};
pub use cache::{ExistenceCache, ProjectCache};
pub use context::{
    CancelPolicies, CancelPolicy, ExecutionSettings, Providers, StepAction, StepContext,
    WorkflowContext, WorkflowMeta,
};
pub use duration::parse_duration;
pub use error::{ErrorList, WorkflowError};
pub use events::*;
pub use graph::StepGraph;
pub use registry::{Entry, PatchJobRecord, Registry, Resource, ResourceRegistry};
pub use resource::{extend_partial_url, is_rfc1035, ResourceKind, ResourceUrl};

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
