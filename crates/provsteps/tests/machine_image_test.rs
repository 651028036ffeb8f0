mod common;

use common::{create_test_workflow, prepare, PROJECT, ZONE};
use provcore::memory::{Call, InMemoryProvider};
use provcore::{ProviderError, StepAction, WorkflowError};
use provsteps::{CreateMachineImages, MachineImage};
use std::time::Duration;

fn provider() -> InMemoryProvider {
    InMemoryProvider::new()
        .with_project(PROJECT)
        .with_instance(PROJECT, ZONE, "inst-1")
        .with_instance(PROJECT, ZONE, "inst-2")
}

fn source(instance: &str) -> String {
    format!("zones/{}/instances/{}", ZONE, instance)
}

#[tokio::test]
async fn test_create_machine_image() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut step = CreateMachineImages(vec![MachineImage::new("image", source("inst-1"))]);

    prepare(&wf, "create-images", &mut step).await.unwrap();
    assert_eq!(step.0[0].image.name, "image-wf-abcde", "real name should be generated");
    assert_eq!(
        step.0[0].image.source_instance,
        format!("projects/{}/zones/{}/instances/inst-1", PROJECT, ZONE)
    );
    assert_eq!(
        step.0[0].resource.link,
        format!("projects/{}/global/machineImages/image-wf-abcde", PROJECT)
    );
    assert!(step.0[0].image.description.contains("\"wf\""));

    step.run(&wf.step_context("create-images")).await.unwrap();

    assert_eq!(provider.machine_images(PROJECT), vec!["image-wf-abcde".to_string()]);
    let entry = wf.machine_images.entry("image").await.unwrap();
    assert!(entry.value.created, "created resource should be recorded");
    assert_eq!(entry.creator.as_deref(), Some("create-images"));
}

#[tokio::test]
async fn test_missing_source_instance() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut step = CreateMachineImages(vec![MachineImage::new("image", "")]);

    let err = prepare(&wf, "create-images", &mut step).await.unwrap_err();
    assert!(err.to_string().contains("must provide SourceInstance"), "got: {}", err);
}

#[tokio::test]
async fn test_source_instance_does_not_exist() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut step = CreateMachineImages(vec![MachineImage::new("image", source("missing"))]);

    let err = prepare(&wf, "create-images", &mut step).await.unwrap_err();
    assert!(
        err.leaves().iter().any(|e| matches!(e, WorkflowError::ResourceDoesNotExist { .. })),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_unregistered_source_instance() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut step = CreateMachineImages(vec![MachineImage::new("image", "local-instance")]);

    let err = prepare(&wf, "create-images", &mut step).await.unwrap_err();
    assert!(
        err.leaves().iter().any(|e| matches!(e, WorkflowError::MissingReference { .. })),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_duplicate_creation_rejected() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["first", "second"], &[]);
    let mut first = CreateMachineImages(vec![MachineImage::new("image", source("inst-1"))]);
    let mut second = CreateMachineImages(vec![MachineImage::new("image", source("inst-2"))]);

    prepare(&wf, "first", &mut first).await.unwrap();
    let err = prepare(&wf, "second", &mut second).await.unwrap_err();
    assert!(
        err.leaves().iter().any(|e| matches!(
            e,
            WorkflowError::DuplicateCreation { creator, .. } if creator == "first"
        )),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_existing_image_requires_overwrite() {
    let provider = provider().with_machine_image(PROJECT, "golden");
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut image = MachineImage::new("golden", source("inst-1"));
    image.resource.exact_name = true;
    let mut step = CreateMachineImages(vec![image]);

    let err = prepare(&wf, "create-images", &mut step).await.unwrap_err();
    assert!(
        err.leaves().iter().any(|e| matches!(e, WorkflowError::AlreadyExists { .. })),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_overwrite_replaces_existing_image() {
    let provider = provider().with_machine_image(PROJECT, "golden");
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut image = MachineImage::new("golden", source("inst-1"));
    image.resource.exact_name = true;
    image.overwrite = true;
    let mut step = CreateMachineImages(vec![image]);

    prepare(&wf, "create-images", &mut step).await.unwrap();
    step.run(&wf.step_context("create-images")).await.unwrap();

    let calls = provider.calls();
    let delete = calls
        .iter()
        .position(|c| matches!(c, Call::DeleteMachineImage { name, .. } if name == "golden"));
    let create = calls
        .iter()
        .position(|c| matches!(c, Call::CreateMachineImage { name, .. } if name == "golden"));
    assert!(delete.is_some() && create.is_some());
    assert!(delete < create, "existing image should be deleted before creating");
}

#[tokio::test]
async fn test_overwrite_without_existing_image() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut image = MachineImage::new("fresh", source("inst-1"));
    image.resource.exact_name = true;
    image.overwrite = true;
    let mut step = CreateMachineImages(vec![image]);

    prepare(&wf, "create-images", &mut step).await.unwrap();
    let result = step.run(&wf.step_context("create-images")).await;

    assert!(result.is_ok(), "not-found on delete should be tolerated: {:?}", result);
    assert_eq!(provider.machine_images(PROJECT), vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_first_error_reported_after_siblings_finish() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut bad = MachineImage::new("bad", source("inst-1"));
    bad.resource.exact_name = true;
    let mut good = MachineImage::new("good", source("inst-2"));
    good.resource.exact_name = true;
    let mut step = CreateMachineImages(vec![bad, good]);

    prepare(&wf, "create-images", &mut step).await.unwrap();
    provider.fail_on(
        "create_machine_image",
        "bad",
        ProviderError::Status {
            code: "403".to_string(),
            message: "quota exceeded".to_string(),
            details: String::new(),
        },
    );

    let err = step.run(&wf.step_context("create-images")).await.unwrap_err();
    assert!(err.to_string().contains("quota exceeded"), "got: {}", err);
    assert_eq!(provider.machine_images(PROJECT), vec!["good".to_string()]);
    assert!(wf.machine_images.get("good").await.unwrap().created);
    assert!(!wf.machine_images.get("bad").await.unwrap().created);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drains_in_flight_creations() {
    let provider = provider().with_create_delay(Duration::from_secs(30));
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut step = CreateMachineImages(vec![
        MachineImage::new("one", source("inst-1")),
        MachineImage::new("two", source("inst-2")),
    ]);
    prepare(&wf, "create-images", &mut step).await.unwrap();

    let ctx = wf.step_context("create-images");
    let handle = tokio::spawn(async move { step.run(&ctx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    wf.cancellation().cancel();

    let result = handle.await.unwrap();
    assert!(result.is_ok(), "cancellation is not an error: {:?}", result);
    assert_eq!(provider.machine_images(PROJECT).len(), 2, "in-flight creations should complete");
    assert!(wf.machine_images.get("one").await.unwrap().created);
    assert!(wf.machine_images.get("two").await.unwrap().created);
}

#[tokio::test]
async fn test_cancelled_before_start_creates_nothing() {
    let provider = provider();
    let wf = create_test_workflow(&provider, &["create-images"], &[]);
    let mut step = CreateMachineImages(vec![MachineImage::new("image", source("inst-1"))]);
    prepare(&wf, "create-images", &mut step).await.unwrap();

    wf.cancellation().cancel();
    step.run(&wf.step_context("create-images")).await.unwrap();

    assert!(provider.machine_images(PROJECT).is_empty());
}
