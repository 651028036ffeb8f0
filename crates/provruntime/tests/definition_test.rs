mod common;

use common::{create_test_runtime, created_snapshots, provider, PROJECT, ZONE};
use provruntime::{ChainError, DefinitionError, LinkOutcome};
use std::path::Path;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn snapshot_workflow_json() -> String {
    format!(
        r#"{{
  "Name": "backup",
  "Vars": {{
    "snap": "default-snap",
    "disk": {{"Value": "data", "Description": "disk to snapshot"}}
  }},
  "Steps": {{
    "snapshot": {{
      "Timeout": "10m",
      "CreateSnapshots": [
        {{"Name": "${{snap}}", "SourceDisk": "zones/{zone}/disks/${{disk}}", "ExactName": true}}
      ]
    }}
  }}
}}"#,
        zone = ZONE
    )
}

#[tokio::test]
async fn test_chain_loaded_from_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "backup.json", &snapshot_workflow_json());
    let chain_path = write(
        dir.path(),
        "chain.json",
        &format!(
            r#"{{
  "Name": "nightly",
  "Project": "{project}",
  "Zone": "{zone}",
  "Chain": [
    {{"Name": "first", "Workflow": "backup.json", "Vars": {{"snap": "from-chain"}}, "OnSuccess": "second"}},
    {{"Name": "second", "Workflow": "backup.json"}}
  ]
}}"#,
            project = PROJECT,
            zone = ZONE
        ),
    );

    let provider = provider();
    let runtime = create_test_runtime(&provider);
    let (mut chain, loader) = runtime.load_chain(&chain_path).unwrap();

    let report = chain.run(&loader).await.unwrap();

    assert_eq!(report.links(), vec!["first", "second"]);
    assert!(report.visited.iter().all(|r| r.outcome == LinkOutcome::Succeeded));
    assert_eq!(
        created_snapshots(&provider),
        vec!["from-chain".to_string(), "default-snap".to_string()]
    );
    let step = chain.link("first").unwrap().workflow().unwrap().step("snapshot").unwrap();
    assert_eq!(step.timeout, Some(std::time::Duration::from_secs(600)));
}

#[tokio::test]
async fn test_missing_workflow_file() {
    let dir = tempfile::tempdir().unwrap();
    let chain_path = write(
        dir.path(),
        "chain.json",
        &format!(
            r#"{{"Name": "nightly", "Project": "{}", "Chain": [{{"Name": "only", "Workflow": "absent.json"}}]}}"#,
            PROJECT
        ),
    );

    let runtime = create_test_runtime(&provider());
    let (mut chain, loader) = runtime.load_chain(&chain_path).unwrap();

    let err = chain.build(&loader).await.unwrap_err();
    assert!(
        matches!(err, ChainError::Load { source: DefinitionError::Io { .. }, .. }),
        "got: {}",
        err
    );
}

#[tokio::test]
async fn test_malformed_workflow_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "broken.json", r#"{"Steps": {"s": {"Unknown": []}}}"#);

    let runtime = create_test_runtime(&provider());
    let err = runtime.load_workflow(&path).err().unwrap();

    match err {
        DefinitionError::Json { path: reported, .. } => assert!(reported.ends_with("broken.json")),
        other => panic!("expected Json error, got {}", other),
    }
}

#[tokio::test]
async fn test_bad_step_timeout_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "slow.json",
        r#"{"Steps": {"s": {"Timeout": "soon", "ExecutePatchJobs": []}}}"#,
    );

    let runtime = create_test_runtime(&provider());
    let err = runtime.load_workflow(&path).err().unwrap();
    assert!(matches!(err, DefinitionError::Workflow(_)), "got: {}", err);
}
