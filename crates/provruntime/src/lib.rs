//! Workflow execution runtime
//!
//! This crate turns definitions into workflows, runs their steps as a DAG
//! with bounded parallelism and composes whole workflows into chains.

mod chain;
mod definition;
mod executor;
mod runtime;
mod workflow;

pub use chain::{ChainError, ChainReport, ChainedWorkflow, Link, LinkOutcome, LinkRun, LinkedWorkflow};
pub use definition::{DefinitionError, StepDefinition, VarDefinition, WorkflowDefinition, WorkflowLoader};
pub use executor::StepScheduler;
pub use runtime::{FileLoader, Runtime, RuntimeConfig};
pub use workflow::{RunSummary, Step, Var, Workflow};
