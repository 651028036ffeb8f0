use crate::definition::{DefinitionError, WorkflowLoader};
use crate::workflow::Workflow;
use chrono::Utc;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use provcore::{ExecutionEvent, WorkflowError};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Project field must be set in chained workflow {0:?}")]
    MissingProject(String),

    #[error("chained workflow {0:?} has no links")]
    EmptyChain(String),

    #[error("link entry {0} must have a name")]
    UnnamedLink(usize),

    #[error("link entry {number}: duplicate name {name:?} with link entry {previous}")]
    DuplicateLink {
        name: String,
        number: usize,
        previous: usize,
    },

    #[error("link {0:?}: linked workflow cannot be blank")]
    MissingWorkflow(String),

    #[error("link {link:?}: error loading workflow: {source}")]
    Load {
        link: String,
        #[source]
        source: DefinitionError,
    },

    #[error("link {link:?}: unknown Var {var:?}")]
    UnknownVar { link: String, var: String },

    #[error("link {link:?}: error populating workflow: {source}")]
    Populate {
        link: String,
        #[source]
        source: WorkflowError,
    },

    #[error("{kind} link {target:?} of link {link:?} does not exist")]
    MissingContinuation {
        link: String,
        kind: &'static str,
        target: String,
    },

    #[error("a link's {kind} cannot be itself: {link:?}")]
    SelfContinuation { link: String, kind: &'static str },

    #[error("continuation cycle between links {0:?}")]
    ContinuationCycle(Vec<String>),

    #[error("link {link:?} failed: {source}")]
    LinkFailed {
        link: String,
        #[source]
        source: WorkflowError,
        report: ChainReport,
    },

    #[error("error serializing chained workflow: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The workflow behind a link: a locator until the chain is built
#[derive(Default)]
pub enum LinkedWorkflow {
    Locator(String),
    Loaded(Box<Workflow>),
    #[default]
    Missing,
}

impl From<String> for LinkedWorkflow {
    fn from(locator: String) -> Self {
        LinkedWorkflow::Locator(locator)
    }
}

impl<'de> Deserialize<'de> for LinkedWorkflow {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(LinkedWorkflow::from)
    }
}

impl Serialize for LinkedWorkflow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LinkedWorkflow::Locator(locator) => serializer.serialize_str(locator),
            LinkedWorkflow::Loaded(workflow) => workflow.to_definition().serialize(serializer),
            LinkedWorkflow::Missing => serializer.serialize_none(),
        }
    }
}

/// One workflow of a chain, with the links to follow on success or failure
#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Link {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(default, rename = "GCSPath", skip_serializing_if = "String::is_empty")]
    pub gcs_path: String,
    #[serde(default, rename = "OAuthPath", skip_serializing_if = "String::is_empty")]
    pub oauth_path: String,

    /// Top level fields of the workflow are overridden by the link's
    #[serde(default)]
    pub workflow: LinkedWorkflow,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    /// Link to run after a successful run; the chain ends here if unset
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_success: String,
    /// Link to run after a failed run; the failure ends the chain if unset
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_failure: String,

    #[serde(skip)]
    number: usize,
    #[serde(skip)]
    success_next: Option<usize>,
    #[serde(skip)]
    failure_next: Option<usize>,
}

impl Link {
    pub fn new(name: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            name: name.into(),
            workflow: LinkedWorkflow::Loaded(Box::new(workflow)),
            ..Default::default()
        }
    }

    pub fn from_locator(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workflow: LinkedWorkflow::Locator(locator.into()),
            ..Default::default()
        }
    }

    pub fn on_success(mut self, link: impl Into<String>) -> Self {
        self.on_success = link.into();
        self
    }

    pub fn on_failure(mut self, link: impl Into<String>) -> Self {
        self.on_failure = link.into();
        self
    }

    /// 1-based position in the chain, set by build
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn workflow(&self) -> Option<&Workflow> {
        match &self.workflow {
            LinkedWorkflow::Loaded(w) => Some(w),
            _ => None,
        }
    }
}

/// Outcome of one link run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome")]
pub enum LinkOutcome {
    Succeeded,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkRun {
    pub link: String,
    #[serde(flatten)]
    pub outcome: LinkOutcome,
}

/// Links visited by a chain run, in order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainReport {
    pub chain: String,
    pub visited: Vec<LinkRun>,
}

impl ChainReport {
    pub fn links(&self) -> Vec<&str> {
        self.visited.iter().map(|r| r.link.as_str()).collect()
    }
}

/// Independent workflows composed through success and failure
/// continuations. The first declared link is the entry point.
#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChainedWorkflow {
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
    #[serde(default)]
    pub chain: Vec<Link>,

    #[serde(skip)]
    built: bool,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl ChainedWorkflow {
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: project.into(),
            ..Default::default()
        }
    }

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

    pub fn add_link(&mut self, link: Link) -> &mut Self {
        self.chain.push(link);
        self
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.chain.iter().find(|l| l.name == name)
    }

    /// Cancelling this token cancels whichever link is running
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Resolve, configure and populate every linked workflow and wire the
    /// continuations. Nothing runs.
    pub async fn build(&mut self, loader: &dyn WorkflowLoader) -> Result<(), ChainError> {
        if self.built {
            return Ok(());
        }
        if self.project.is_empty() {
            return Err(ChainError::MissingProject(self.name.clone()));
        }
        if self.chain.is_empty() {
            return Err(ChainError::EmptyChain(self.name.clone()));
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, link) in self.chain.iter_mut().enumerate() {
            link.number = i + 1;
            if link.name.is_empty() {
                return Err(ChainError::UnnamedLink(link.number));
            }
            if let Some(&previous) = index.get(&link.name) {
                return Err(ChainError::DuplicateLink {
                    name: link.name.clone(),
                    number: link.number,
                    previous: previous + 1,
                });
            }
            index.insert(link.name.clone(), i);
        }

        for i in 0..self.chain.len() {
            let link = &mut self.chain[i];

            let mut workflow = match std::mem::take(&mut link.workflow) {
                LinkedWorkflow::Loaded(workflow) => workflow,
                LinkedWorkflow::Locator(locator) if !locator.is_empty() => {
                    Box::new(loader.load(&locator).map_err(|source| ChainError::Load {
                        link: link.name.clone(),
                        source,
                    })?)
                }
                _ => return Err(ChainError::MissingWorkflow(link.name.clone())),
            };

            link.project = or_default(&link.project, &self.project);
            link.zone = or_default(&link.zone, &self.zone);
            link.gcs_path = or_default(&link.gcs_path, &self.gcs_path);
            link.oauth_path = or_default(&link.oauth_path, &self.oauth_path);

            workflow.name = link.name.clone();
            workflow.project = link.project.clone();
            workflow.zone = link.zone.clone();
            workflow.gcs_path = link.gcs_path.clone();
            workflow.oauth_path = link.oauth_path.clone();

            for (k, v) in &link.vars {
                if !workflow.has_var(k) {
                    return Err(ChainError::UnknownVar {
                        link: link.name.clone(),
                        var: k.clone(),
                    });
                }
                workflow.add_var(k.clone(), v.clone());
            }

            let populated = match workflow.set_cancellation(self.cancellation.child_token()) {
                Ok(()) => workflow.populate().await,
                Err(e) => Err(e),
            };
            populated.map_err(|source| ChainError::Populate {
                link: link.name.clone(),
                source,
            })?;
            link.workflow = LinkedWorkflow::Loaded(workflow);

            link.success_next = resolve_continuation(&index, i, &link.name, &link.on_success, "OnSuccess")?;
            link.failure_next = resolve_continuation(&index, i, &link.name, &link.on_failure, "OnFailure")?;
        }

        self.check_cycles()?;
        self.built = true;
        Ok(())
    }

    /// Continuations must not loop back to a link already on the path
    fn check_cycles(&self) -> Result<(), ChainError> {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..self.chain.len()).map(|i| graph.add_node(i)).collect();
        for (i, link) in self.chain.iter().enumerate() {
            for next in [link.success_next, link.failure_next].into_iter().flatten() {
                graph.update_edge(nodes[i], nodes[next], ());
            }
        }

        for component in tarjan_scc(&graph) {
            if component.len() > 1 {
                let mut names: Vec<String> = component
                    .iter()
                    .map(|n| self.chain[graph[*n]].name.clone())
                    .collect();
                names.sort();
                return Err(ChainError::ContinuationCycle(names));
            }
        }
        Ok(())
    }

    /// Build the chain, then run links from the entry point following the
    /// branch for each outcome.
    pub async fn run(&mut self, loader: &dyn WorkflowLoader) -> Result<ChainReport, ChainError> {
        self.build(loader).await?;
        info!(chain = %self.name, "running chained workflow");

        let mut report = ChainReport {
            chain: self.name.clone(),
            visited: Vec::new(),
        };
        let mut current = Some(0);

        while let Some(i) = current {
            let link = &mut self.chain[i];
            let LinkedWorkflow::Loaded(workflow) = &mut link.workflow else {
                return Err(ChainError::MissingWorkflow(link.name.clone()));
            };

            info!(chain = %self.name, link = %link.name, number = link.number, "running workflow link");
            workflow.events().emit(ExecutionEvent::LinkStarted {
                chain: self.name.clone(),
                link: link.name.clone(),
                timestamp: Utc::now(),
            });
            let result = workflow.run().await;
            workflow.events().emit(ExecutionEvent::LinkCompleted {
                chain: self.name.clone(),
                link: link.name.clone(),
                success: result.is_ok(),
                timestamp: Utc::now(),
            });

            match result {
                Ok(_) => {
                    info!(chain = %self.name, link = %link.name, "workflow ended in success");
                    report.visited.push(LinkRun {
                        link: link.name.clone(),
                        outcome: LinkOutcome::Succeeded,
                    });
                    if self.cancellation.is_cancelled() {
                        info!(chain = %self.name, link = %link.name, "chain cancelled, not following OnSuccess");
                        break;
                    }
                    current = link.success_next;
                }
                Err(e) => {
                    report.visited.push(LinkRun {
                        link: link.name.clone(),
                        outcome: LinkOutcome::Failed { error: e.to_string() },
                    });
                    match link.failure_next {
                        Some(next) => {
                            warn!(chain = %self.name, link = %link.name, "workflow ended in failure, running OnFailure link: {}", e);
                            current = Some(next);
                        }
                        None => {
                            return Err(ChainError::LinkFailed {
                                link: link.name.clone(),
                                source: e,
                                report,
                            });
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Build the chain and render it as pretty JSON
    pub async fn print(&mut self, loader: &dyn WorkflowLoader) -> Result<String, ChainError> {
        self.build(loader).await?;
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn or_default(value: &str, default: &str) -> String {
    let chosen = if value.is_empty() { default } else { value };
    chosen.to_string()
}

fn resolve_continuation(
    index: &HashMap<String, usize>,
    current: usize,
    link: &str,
    target: &str,
    kind: &'static str,
) -> Result<Option<usize>, ChainError> {
    if target.is_empty() {
        return Ok(None);
    }
    let next = *index.get(target).ok_or_else(|| ChainError::MissingContinuation {
        link: link.to_string(),
        kind,
        target: target.to_string(),
    })?;
    if next == current {
        return Err(ChainError::SelfContinuation {
            link: link.to_string(),
            kind,
        });
    }
    Ok(Some(next))
}
