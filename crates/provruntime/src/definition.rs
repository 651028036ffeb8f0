//! JSON workflow definitions
//!
//! The document format mirrors the in-memory workflow:
//!
//! ```json
//! {
//!   "Name": "patch-and-image",
//!   "Vars": {"filter": {"Value": "name=web-*", "Required": true}},
//!   "Steps": {
//!     "patch": {"ExecutePatchJobs": [{"Name": "p", "Filter": "${filter}"}]},
//!     "wait": {"Timeout": "30m", "AwaitPatchJobs": [{"Name": "p"}]}
//!   },
//!   "Dependencies": {"wait": ["patch"]}
//! }
//! ```

use crate::workflow::{Var, Workflow};
use provcore::WorkflowError;
use provsteps::StepKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: invalid definition: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Resolves a link's workflow locator into a workflow
pub trait WorkflowLoader: Send + Sync {
    fn load(&self, locator: &str) -> Result<Workflow, DefinitionError>;
}

impl<F> WorkflowLoader for F
where
    F: Fn(&str) -> Result<Workflow, DefinitionError> + Send + Sync,
{
    fn load(&self, locator: &str) -> Result<Workflow, DefinitionError> {
        self(locator)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(default, rename = "GCSPath", skip_serializing_if = "String::is_empty")]
    pub gcs_path: String,
    #[serde(default, rename = "OAuthPath", skip_serializing_if = "String::is_empty")]
    pub oauth_path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, VarDefinition>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// A variable is either a plain default value or a full declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarDefinition {
    Value(String),
    Declared(Var),
}

impl From<VarDefinition> for Var {
    fn from(def: VarDefinition) -> Self {
        match def {
            VarDefinition::Value(value) => Var {
                value,
                ..Default::default()
            },
            VarDefinition::Declared(var) => var,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl WorkflowDefinition {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| DefinitionError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(data: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(data).map_err(|source| DefinitionError::Json {
            path: "<inline>".to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition() {
        let def = WorkflowDefinition::from_json(
            r#"{
                "Name": "wf",
                "Project": "p",
                "GCSPath": "gs://bucket",
                "Vars": {
                    "plain": "value",
                    "declared": {"Value": "x", "Required": true, "Description": "a var"}
                },
                "Steps": {
                    "patch": {"ExecutePatchJobs": [{"Name": "job", "Filter": "${plain}"}]},
                    "wait": {"Timeout": "30m", "AwaitPatchJobs": [{"Name": "job"}]}
                },
                "Dependencies": {"wait": ["patch"]}
            }"#,
        )
        .unwrap();

        assert_eq!(def.gcs_path, "gs://bucket");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps["wait"].timeout, "30m");
        assert!(matches!(def.steps["patch"].kind, StepKind::ExecutePatchJobs(_)));
        assert_eq!(def.dependencies["wait"], vec!["patch".to_string()]);

        let plain: Var = def.vars["plain"].clone().into();
        assert_eq!(plain.value, "value");
        assert!(!plain.required);
        let declared: Var = def.vars["declared"].clone().into();
        assert!(declared.required);
        assert_eq!(declared.description, "a var");
    }

    #[test]
    fn test_step_without_type_rejected() {
        let result = WorkflowDefinition::from_json(r#"{"Steps": {"s": {"Timeout": "1m"}}}"#);
        assert!(matches!(result, Err(DefinitionError::Json { .. })));
    }
}
