mod common;

use common::{create_test_workflow, prepare, PROJECT};
use provcore::memory::{Call, InMemoryProvider};
use provcore::{PatchJobState, ProviderError, StepAction, WorkflowError};
use provsteps::{AwaitPatchJob, AwaitPatchJobs, ExecutePatchJobs, PatchJob};
use std::time::Duration;

fn provider() -> InMemoryProvider {
    InMemoryProvider::new().with_project(PROJECT)
}

const STEPS: &[&str] = &["execute", "await"];
const DEPS: &[(&str, &str)] = &[("await", "execute")];

async fn execute_and_prepare_await(
    provider: &InMemoryProvider,
    await_step: &mut AwaitPatchJobs,
) -> std::sync::Arc<provcore::WorkflowContext> {
    let wf = create_test_workflow(provider, STEPS, DEPS);
    let mut execute = ExecutePatchJobs(vec![PatchJob::new("patch", "name=web-*")]);
    prepare(&wf, "execute", &mut execute).await.unwrap();
    prepare(&wf, "await", await_step).await.unwrap();
    execute.run(&wf.step_context("execute")).await.unwrap();
    wf
}

#[tokio::test]
async fn test_execute_defaults_parent_to_workflow_project() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["execute"], &[]);
    let mut step = ExecutePatchJobs(vec![PatchJob::new("patch", "")]);

    prepare(&wf, "execute", &mut step).await.unwrap();
    assert_eq!(step.0[0].request.parent, format!("projects/{}", PROJECT));
    assert!(step.0[0].request.description.contains("on behalf of tester"));

    step.run(&wf.step_context("execute")).await.unwrap();
    let record = wf.patch_jobs.get("patch").await.unwrap();
    let job = record.job.expect("executed job should be recorded");
    assert!(job.name.starts_with(&format!("projects/{}/patchJobs/", PROJECT)));
}

#[tokio::test]
async fn test_execute_unknown_project_rejected() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["execute"], &[]);
    let mut job = PatchJob::new("patch", "");
    job.request.parent = "projects/elsewhere".to_string();
    let mut step = ExecutePatchJobs(vec![job]);

    let err = prepare(&wf, "execute", &mut step).await.unwrap_err();
    assert!(err.to_string().contains("cannot create PatchJob"), "got: {}", err);
    assert!(err.to_string().contains("does not exist"), "got: {}", err);
}

#[tokio::test]
async fn test_execute_stops_at_first_failure() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["execute"], &[]);
    let mut first = PatchJob::new("first", "");
    first.request.parent = format!("projects/{}", PROJECT);
    let mut step = ExecutePatchJobs(vec![first, PatchJob::new("second", "")]);
    prepare(&wf, "execute", &mut step).await.unwrap();

    provider.fail_on("execute_patch_job", "*", ProviderError::Other("permission denied".to_string()));
    let err = step.run(&wf.step_context("execute")).await.unwrap_err();

    assert!(err.to_string().contains("permission denied"), "got: {}", err);
    let executed = provider
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::ExecutePatchJob { .. }))
        .count();
    assert_eq!(executed, 1, "jobs after a failure must not be started");
}

#[tokio::test]
async fn test_patch_client_connects_once() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["execute"], &[]);
    let mut step = ExecutePatchJobs(vec![PatchJob::new("one", ""), PatchJob::new("two", "")]);

    prepare(&wf, "execute", &mut step).await.unwrap();

    let connects = provider.calls().iter().filter(|c| **c == Call::Connect).count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_connect_failure_is_memoized() {
    let provider = provider().with_connect_failure(ProviderError::Other("no credentials".to_string()));
    let wf = create_test_workflow(&provider, &["execute"], &[]);
    let mut step = ExecutePatchJobs(vec![PatchJob::new("one", ""), PatchJob::new("two", "")]);

    let err = step.populate(&wf.step_context("execute")).await.unwrap_err();
    assert_eq!(err.leaves().len(), 1, "connection failure reported once: {}", err);
    assert!(err.to_string().contains("no credentials"));

    let connects = provider.calls().iter().filter(|c| **c == Call::Connect).count();
    assert_eq!(connects, 1, "failed connection must not be retried");

    let run_err = step.run(&wf.step_context("execute")).await.unwrap_err();
    assert!(run_err.to_string().contains("patch client is not available"));
}

#[tokio::test]
async fn test_await_without_dependency_rejected() {
    let provider = provider();
    let wf = create_test_workflow(&provider, STEPS, &[]);
    let mut execute = ExecutePatchJobs(vec![PatchJob::new("patch", "")]);
    let mut await_step = AwaitPatchJobs(vec![AwaitPatchJob::new("patch")]);

    prepare(&wf, "execute", &mut execute).await.unwrap();
    let err = prepare(&wf, "await", &mut await_step).await.unwrap_err();
    assert!(
        err.leaves().iter().any(|e| matches!(e, WorkflowError::DependencyViolation { .. })),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_await_unknown_job_rejected() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["await"], &[]);
    let mut await_step = AwaitPatchJobs(vec![AwaitPatchJob::new("nope")]);

    let err = prepare(&wf, "await", &mut await_step).await.unwrap_err();
    assert!(
        err.leaves().iter().any(|e| matches!(e, WorkflowError::MissingReference { .. })),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_await_interval_parsing() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["await"], &[]);

    let mut default = AwaitPatchJobs(vec![AwaitPatchJob::new("a")]);
    default.populate(&wf.step_context("await")).await.unwrap();
    assert_eq!(default.0[0].period(), Duration::from_secs(5));
    assert_eq!(default.0[0].interval, "5s");

    let mut custom = AwaitPatchJobs(vec![AwaitPatchJob::new("b").with_interval("1m30s")]);
    custom.populate(&wf.step_context("await")).await.unwrap();
    assert_eq!(custom.0[0].period(), Duration::from_secs(90));

    let mut bad = AwaitPatchJobs(vec![AwaitPatchJob::new("c").with_interval("soon")]);
    assert!(bad.populate(&wf.step_context("await")).await.is_err());

    let mut zero = AwaitPatchJobs(vec![AwaitPatchJob::new("d").with_interval("0s")]);
    assert!(zero.populate(&wf.step_context("await")).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_await_until_succeeded() {
    let provider = provider();
    provider.script_patch_job(vec![
        (PatchJobState::InstanceLookup, ""),
        (PatchJobState::Patching, ""),
        (PatchJobState::Succeeded, ""),
    ]);
    let mut await_step = AwaitPatchJobs(vec![AwaitPatchJob::new("patch").with_interval("10s")]);
    let wf = execute_and_prepare_await(&provider, &mut await_step).await;

    await_step.run(&wf.step_context("await")).await.unwrap();

    let polls = provider
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::GetPatchJob { .. }))
        .count();
    assert_eq!(polls, 3);
    let job = wf.patch_jobs.get("patch").await.unwrap().job.unwrap();
    assert_eq!(job.state, PatchJobState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_await_completed_with_errors() {
    let provider = provider();
    provider.script_patch_job(vec![
        (PatchJobState::Patching, ""),
        (PatchJobState::CompletedWithErrors, "2 instances failed"),
    ]);
    let mut await_step = AwaitPatchJobs(vec![AwaitPatchJob::new("patch")]);
    let wf = execute_and_prepare_await(&provider, &mut await_step).await;

    let err = await_step.run(&wf.step_context("await")).await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::JobFailed { state: PatchJobState::CompletedWithErrors, .. }
    ));
    let message = err.to_string();
    assert!(message.contains("COMPLETED_WITH_ERRORS"), "got: {}", message);
    assert!(message.contains("2 instances failed"), "got: {}", message);
}

#[tokio::test(start_paused = true)]
async fn test_await_fetch_error_includes_status() {
    let provider = provider();
    let mut await_step = AwaitPatchJobs(vec![AwaitPatchJob::new("patch")]);
    let wf = execute_and_prepare_await(&provider, &mut await_step).await;

    provider.fail_on(
        "get_patch_job",
        "*",
        ProviderError::Status {
            code: "503".to_string(),
            message: "backend unavailable".to_string(),
            details: "retry later".to_string(),
        },
    );
    let err = await_step.run(&wf.step_context("await")).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("error while fetching patch job"), "got: {}", message);
    assert!(message.contains("503"), "got: {}", message);
    assert!(message.contains("backend unavailable"), "got: {}", message);
    assert!(message.contains("retry later"), "got: {}", message);
}

#[tokio::test(start_paused = true)]
async fn test_await_returns_on_cancel() {
    let provider = provider();
    provider.script_patch_job(vec![(PatchJobState::Patching, "")]);
    let mut await_step = AwaitPatchJobs(vec![AwaitPatchJob::new("patch")]);
    let wf = execute_and_prepare_await(&provider, &mut await_step).await;

    let ctx = wf.step_context("await");
    let handle = tokio::spawn(async move { await_step.run(&ctx).await });

    tokio::time::sleep(Duration::from_secs(12)).await;
    wf.cancellation().cancel();

    let result = handle.await.unwrap();
    assert!(result.is_ok(), "cancellation is not an error: {:?}", result);
}
