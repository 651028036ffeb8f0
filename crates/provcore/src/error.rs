use crate::api::{PatchJobState, ProviderError};
use crate::ResourceKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("cannot create {kind} {name:?}; already created by step {creator:?}")]
    DuplicateCreation {
        kind: ResourceKind,
        name: String,
        creator: String,
    },

    #[error("missing reference for {kind} {name:?}")]
    MissingReference { kind: ResourceKind, name: String },

    #[error("step {user:?} using {kind} {name:?} MUST transitively depend on step {creator:?} which creates {name:?}")]
    DependencyViolation {
        kind: ResourceKind,
        name: String,
        user: String,
        creator: String,
    },

    #[error("cannot create {kind} {name:?}; it already exists in project {project:?}")]
    AlreadyExists {
        kind: ResourceKind,
        name: String,
        project: String,
    },

    #[error("{kind} {name:?} does not exist")]
    ResourceDoesNotExist { kind: ResourceKind, name: String },

    #[error("{context}: {source}")]
    Provider {
        context: String,
        #[source]
        source: ProviderError,
    },

    #[error("failure status {state} with message {message:?}")]
    JobFailed {
        job: String,
        state: PatchJobState,
        message: String,
    },

    #[error("step {step:?} did not complete within {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },

    #[error("step {step:?} run error: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<WorkflowError>,
    },

    #[error("dependency of {dependent:?} on {dependency:?} would create a cycle")]
    CyclicDependency {
        dependent: String,
        dependency: String,
    },

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error(transparent)]
    Multiple(ErrorList),
}

impl WorkflowError {
    pub fn provider(context: impl Into<String>, source: ProviderError) -> Self {
        WorkflowError::Provider {
            context: context.into(),
            source,
        }
    }

    /// Walk through aggregated and step-wrapped errors to the leaves
    pub fn leaves(&self) -> Vec<&WorkflowError> {
        match self {
            WorkflowError::Multiple(list) => list.iter().flat_map(|e| e.leaves()).collect(),
            WorkflowError::StepFailed { source, .. } => source.leaves(),
            other => vec![other],
        }
    }

    pub fn is_resource_dne(&self) -> bool {
        matches!(self, WorkflowError::ResourceDoesNotExist { .. })
    }
}

/// Errors collected over a populate or validate pass and reported together
#[derive(Debug, Clone, Default)]
pub struct ErrorList(Vec<WorkflowError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: WorkflowError) {
        match err {
            WorkflowError::Multiple(list) => self.0.extend(list.0),
            other => self.0.push(other),
        }
    }

    /// Record the error side of a result, discarding the value
    pub fn check<T>(&mut self, result: Result<T, WorkflowError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowError> {
        self.0.iter()
    }

    pub fn into_result(mut self) -> Result<(), WorkflowError> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(WorkflowError::Multiple(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiple errors:")?;
        for e in &self.0 {
            write!(f, "\n* {}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_list_single_error_is_unwrapped() {
        let mut errs = ErrorList::new();
        errs.push(WorkflowError::Validation("bad".to_string()));
        let err = errs.into_result().unwrap_err();
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_error_list_flattens_nested_lists() {
        let mut inner = ErrorList::new();
        inner.push(WorkflowError::Validation("a".to_string()));
        inner.push(WorkflowError::Validation("b".to_string()));

        let mut outer = ErrorList::new();
        outer.push(WorkflowError::Multiple(inner));
        outer.push(WorkflowError::StepNotFound("c".to_string()));
        assert_eq!(outer.len(), 3);

        let err = outer.into_result().unwrap_err();
        assert_eq!(err.leaves().len(), 3);
        assert!(err.to_string().starts_with("Multiple errors:"));
    }

    #[test]
    fn test_step_failed_leaves() {
        let err = WorkflowError::StepFailed {
            step: "s".to_string(),
            source: Box::new(WorkflowError::Execution("boom".to_string())),
        };
        assert!(matches!(err.leaves()[0], WorkflowError::Execution(_)));
    }
}
