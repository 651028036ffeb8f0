use crate::workflow::{RunSummary, Step};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use provcore::{ExecutionEvent, StepAction, StepContext, StepGraph, WorkflowContext, WorkflowError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Runs the steps of a validated workflow in dependency order with bounded
/// parallelism.
pub struct StepScheduler {
    max_parallel: usize,
}

impl StepScheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run every step once its dependencies have completed.
    ///
    /// The first step failure raises the workflow cancellation, waits for
    /// the steps already running and is returned as `StepFailed`. When
    /// cancellation comes from outside, no new steps start and the run
    /// ends without error.
    pub async fn execute(
        &self,
        ctx: &Arc<WorkflowContext>,
        mut pending: BTreeMap<String, Step>,
    ) -> Result<RunSummary, WorkflowError> {
        let mut completed = HashSet::new();
        let mut order = Vec::new();
        let mut running = FuturesUnordered::new();
        let mut failure: Option<WorkflowError> = None;

        loop {
            if failure.is_none() && !ctx.cancellation().is_cancelled() {
                for name in self.find_ready_steps(&ctx.graph, &pending, &completed) {
                    if running.len() >= self.max_parallel {
                        break;
                    }
                    let step = pending
                        .remove(&name)
                        .ok_or_else(|| WorkflowError::StepNotFound(name.clone()))?;

                    ctx.events().emit(ExecutionEvent::StepStarted {
                        execution_id: ctx.execution_id,
                        step: name.clone(),
                        step_type: step.action.step_type().to_string(),
                        timestamp: Utc::now(),
                    });
                    debug!(workflow = %ctx.meta.name, step = %name, "starting step");

                    running.push(tokio::spawn(run_step(step, ctx.step_context(&name))));
                }
            }

            // Nothing running means nothing left that can start
            let Some(joined) = running.next().await else {
                break;
            };
            let (name, result, duration_ms) =
                joined.map_err(|e| WorkflowError::Execution(format!("Task join error: {}", e)))?;

            match result {
                Ok(()) => {
                    info!(workflow = %ctx.meta.name, step = %name, "step completed in {}ms", duration_ms);
                    ctx.events().emit(ExecutionEvent::StepCompleted {
                        execution_id: ctx.execution_id,
                        step: name.clone(),
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                    completed.insert(name.clone());
                    order.push(name);
                }
                Err(e) => {
                    ctx.events().emit(ExecutionEvent::StepFailed {
                        execution_id: ctx.execution_id,
                        step: name.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    if failure.is_some() {
                        warn!(workflow = %ctx.meta.name, step = %name, "step failed after workflow failure: {}", e);
                        continue;
                    }
                    error!(workflow = %ctx.meta.name, step = %name, "step failed: {}", e);
                    ctx.cancellation().cancel();
                    failure = Some(WorkflowError::StepFailed {
                        step: name,
                        source: Box::new(e),
                    });
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        let cancelled = ctx.cancellation().is_cancelled();
        if cancelled && !pending.is_empty() {
            info!(workflow = %ctx.meta.name, skipped = pending.len(), "cancelled, remaining steps not started");
        }

        Ok(RunSummary {
            execution_id: ctx.execution_id,
            completed: order,
            cancelled,
        })
    }

    /// Steps not yet started whose dependencies have all completed
    fn find_ready_steps(
        &self,
        graph: &StepGraph,
        pending: &BTreeMap<String, Step>,
        completed: &HashSet<String>,
    ) -> Vec<String> {
        pending
            .keys()
            .filter(|name| graph.dependencies(name).iter().all(|dep| completed.contains(*dep)))
            .cloned()
            .collect()
    }
}

/// Run one step under its timeout.
///
/// A timeout cancels the step's own token and then waits for the step to
/// return, so creation steps drain the calls they already sent before the
/// timeout is reported.
async fn run_step(step: Step, ctx: StepContext) -> (String, Result<(), WorkflowError>, u64) {
    let start = Instant::now();
    let result = match step.timeout {
        Some(limit) => {
            let run = step.action.run(&ctx);
            tokio::pin!(run);
            match timeout(limit, &mut run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(step = %step.name, "timed out after {:?}, stopping", limit);
                    ctx.cancellation().cancel();
                    if let Err(e) = run.await {
                        warn!(step = %step.name, "error while stopping timed out step: {}", e);
                    }
                    Err(WorkflowError::StepTimeout {
                        step: step.name.clone(),
                        timeout: limit,
                    })
                }
            }
        }
        None => step.action.run(&ctx).await,
    };
    (step.name, result, start.elapsed().as_millis() as u64)
}
