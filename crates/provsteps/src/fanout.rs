use provcore::{CancelPolicy, StepContext, WorkflowError};
use tokio::task::JoinSet;
use tracing::debug;

/// How a fan-out step reacts to its first failed worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnError {
    /// Let the remaining workers finish, then report the first error
    Settle,
    /// Report the first error at once; remaining workers are aborted
    Return,
}

/// Wait for every worker of a fan-out step.
///
/// Only the first error is returned; later ones are logged as step
/// warnings. Cancellation ends the wait according to `policy` and is not
/// itself an error.
pub(crate) async fn join_workers(
    ctx: &StepContext,
    step_type: &'static str,
    mut workers: JoinSet<Result<(), WorkflowError>>,
    policy: CancelPolicy,
    on_error: OnError,
) -> Result<(), WorkflowError> {
    let cancellation = ctx.cancellation().clone();
    let mut first_error: Option<WorkflowError> = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            joined = workers.join_next() => {
                let Some(joined) = joined else { break };
                let result = joined.unwrap_or_else(|e| {
                    Err(WorkflowError::Execution(format!("worker task failed: {}", e)))
                });
                let Err(err) = result else { continue };

                if first_error.is_some() || cancelled {
                    ctx.warn(step_type, format!("additional error: {}", err));
                } else if on_error == OnError::Return {
                    return Err(err);
                } else {
                    first_error = Some(err);
                }
            }
            _ = cancellation.cancelled(), if !cancelled => {
                match policy {
                    CancelPolicy::Drain => {
                        debug!(step = %ctx.step, remaining = workers.len(), "cancelled, draining workers");
                        cancelled = true;
                    }
                    CancelPolicy::Detach => {
                        debug!(step = %ctx.step, remaining = workers.len(), "cancelled, detaching workers");
                        workers.detach_all();
                        break;
                    }
                }
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}
