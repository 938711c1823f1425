//! Pipeline controller behaviour against a scripted runner

mod support;

use base64ct::{Base64, Encoding};
use forgeline::build::{
    AssemblyMode, PayloadPlan, StageSpec, Substitutions, AGENT_STAGE, MODULE_STAGE,
    TRANSPORT_STAGE,
};
use forgeline::error::{BuildError, ErrorKind};
use forgeline::process::{MockProcessRunner, MockStage};
use std::sync::Arc;
use std::time::Duration;
use support::*;

fn template_plan(harness: &Harness, record_id: u64) -> PayloadPlan {
    PayloadPlan {
        record_id,
        build_token: "token-1".to_string(),
        working_dir: harness.agent_dir(),
        transport: StageSpec::new(
            TRANSPORT_STAGE,
            Some(TRANSPORT_COMMAND.to_string()),
            TRANSPORT_OUTPUT,
        ),
        agent: StageSpec::new(AGENT_STAGE, Some(FORMAT_COMMAND.to_string()), FORMAT_OUTPUT),
        mode: AssemblyMode::Template {
            transport: Substitutions::new(),
            agent: Substitutions::new()
                .with("PAYLOADNAME", "foo")
                .with("PAYLOADKEY", "bar"),
        },
        catalog_name: AGENT_NAME.to_string(),
        variant_name: "Exe".to_string(),
        payload_name: "foo".to_string(),
    }
}

fn module_stage() -> StageSpec {
    StageSpec::new(MODULE_STAGE, Some(MODULE_COMMAND.to_string()), MODULE_OUTPUT)
}

#[tokio::test]
async fn test_payload_build_runs_transport_then_agent_and_uploads_agent_bytes() {
    let runner = MockProcessRunner::new()
        .on(
            TRANSPORT_COMMAND,
            MockStage::exit(0).writes(TRANSPORT_OUTPUT, b"transport-bytes".to_vec()),
        )
        .on(
            "./format.sh",
            MockStage::exit(0).writes(FORMAT_OUTPUT, b"agent-bytes".to_vec()),
        );
    let harness = Harness::new(runner).await;

    let published = harness
        .context
        .controller
        .build_payload("run-1", template_plan(&harness, 42))
        .await
        .unwrap();

    let invocations = harness.runner.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].command_line, TRANSPORT_COMMAND);
    assert_eq!(
        invocations[1].command_line,
        format!(
            "./format.sh --name foo --key bar --transport {}",
            Base64::encode_string(b"transport-bytes")
        )
    );
    assert!(invocations.iter().all(|i| i.working_dir == harness.agent_dir()));

    let uploads = harness.store.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, 42);
    assert_eq!(uploads[0].1, "token-1");
    assert_eq!(uploads[0].2, b"agent-bytes");

    assert_eq!(published.ack, "{\"id\":42}");
    assert!(published.path.starts_with(&harness.config.build_dir));
    assert!(published.path.to_string_lossy().ends_with(".exe"));
    assert!(!harness.agent_dir().join(FORMAT_OUTPUT).exists());
}

#[tokio::test]
async fn test_transport_failure_never_runs_agent_stage() {
    let runner = MockProcessRunner::new()
        .on(
            TRANSPORT_COMMAND,
            MockStage::exit(2).with_output("compiling transport", "error CS1002: ; expected"),
        )
        .on(
            "./format.sh",
            MockStage::exit(0).writes(FORMAT_OUTPUT, b"agent".to_vec()),
        );
    let harness = Harness::new(runner).await;

    let error = harness
        .context
        .controller
        .build_payload("run-2", template_plan(&harness, 1))
        .await
        .unwrap_err();

    assert_eq!(harness.runner.invocation_count(), 1);
    assert_eq!(error.kind(), ErrorKind::StageFailure);
    assert_eq!(error.stage(), Some(TRANSPORT_STAGE));
    let details = error.details();
    assert!(details.contains("compiling transport"));
    assert!(details.contains("error CS1002: ; expected"));
    assert!(harness.store.uploads().is_empty());
}

#[tokio::test]
async fn test_zero_exit_without_output_is_artifact_missing() {
    let runner = MockProcessRunner::new().on(MODULE_COMMAND, MockStage::exit(0));
    let harness = Harness::new(runner).await;

    let error = harness
        .context
        .controller
        .build_module("run-3", &harness.module_dir(), &module_stage())
        .await
        .unwrap_err();

    match error {
        BuildError::ArtifactMissing { stage, path, .. } => {
            assert_eq!(stage, MODULE_STAGE);
            assert_eq!(path, harness.module_dir().join(MODULE_OUTPUT));
        }
        other => panic!("expected ArtifactMissing, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_output_is_artifact_missing() {
    let runner = MockProcessRunner::new().on(
        MODULE_COMMAND,
        MockStage::exit(0).writes(MODULE_OUTPUT, Vec::new()),
    );
    let harness = Harness::new(runner).await;

    let error = harness
        .context
        .controller
        .build_module("run-4", &harness.module_dir(), &module_stage())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ArtifactMissing);
}

#[tokio::test]
async fn test_stale_output_does_not_pass_as_fresh_build() {
    let runner = MockProcessRunner::new().on(MODULE_COMMAND, MockStage::exit(0));
    let harness = Harness::new(runner).await;
    let stale = harness.module_dir().join(MODULE_OUTPUT);
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, b"yesterday").unwrap();

    let error = harness
        .context
        .controller
        .build_module("run-5", &harness.module_dir(), &module_stage())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::ArtifactMissing);
}

#[tokio::test]
async fn test_module_content_decodes_to_output_bytes() {
    let bytes: Vec<u8> = (0u8..=255).collect();
    let runner = MockProcessRunner::new().on(
        MODULE_COMMAND,
        MockStage::exit(0).writes(MODULE_OUTPUT, bytes.clone()),
    );
    let harness = Harness::new(runner).await;

    let data = harness
        .context
        .controller
        .build_module("run-6", &harness.module_dir(), &module_stage())
        .await
        .unwrap();

    assert_eq!(Base64::decode_vec(&data).unwrap(), bytes);
}

#[tokio::test]
async fn test_spawn_failure_is_reported_per_stage() {
    let runner = MockProcessRunner::new().on(MODULE_COMMAND, MockStage::spawn_failure());
    let harness = Harness::new(runner).await;

    let error = harness
        .context
        .controller
        .build_module("run-7", &harness.module_dir(), &module_stage())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::SpawnFailure);
    assert_eq!(error.stage(), Some(MODULE_STAGE));
}

#[tokio::test]
async fn test_same_working_directory_never_overlaps() {
    let runner = MockProcessRunner::new().on(
        MODULE_COMMAND,
        MockStage::exit(0)
            .writes(MODULE_OUTPUT, b"module".to_vec())
            .with_delay(Duration::from_millis(40)),
    );
    let harness = Harness::new(runner).await;
    let dir = harness.module_dir();

    let builds: Vec<_> = (0..4)
        .map(|i| {
            let controller = Arc::clone(&harness.context.controller);
            let dir = dir.clone();
            tokio::spawn(async move {
                controller
                    .build_module(&format!("run-{}", i), &dir, &module_stage())
                    .await
            })
        })
        .collect();
    for build in join_all(builds).await {
        build.unwrap();
    }

    assert_eq!(harness.runner.invocation_count(), 4);
    assert_eq!(harness.runner.peak_concurrency(&dir), 1);
}

#[tokio::test]
async fn test_different_working_directories_may_overlap() {
    let runner = MockProcessRunner::new().on(
        MODULE_COMMAND,
        MockStage::exit(0)
            .writes(MODULE_OUTPUT, b"module".to_vec())
            .with_delay(Duration::from_millis(100)),
    );
    let harness = Harness::new(runner).await;
    let first = harness.dir.path().join("modules/dotnet");
    let second = harness.dir.path().join("modules/go");

    let a = {
        let controller = Arc::clone(&harness.context.controller);
        let dir = first.clone();
        tokio::spawn(async move { controller.build_module("a", &dir, &module_stage()).await })
    };
    let b = {
        let controller = Arc::clone(&harness.context.controller);
        let dir = second.clone();
        tokio::spawn(async move { controller.build_module("b", &dir, &module_stage()).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(harness.runner.peak_concurrency(&first), 1);
    assert_eq!(harness.runner.peak_concurrency(&second), 1);
    assert_eq!(harness.runner.peak_total_concurrency(), 2);
}

#[tokio::test]
async fn test_run_states_follow_stage_order() {
    let runner = MockProcessRunner::new()
        .on(
            TRANSPORT_COMMAND,
            MockStage::exit(0).writes(TRANSPORT_OUTPUT, b"t".to_vec()),
        )
        .on(
            "./format.sh",
            MockStage::exit(0).writes(FORMAT_OUTPUT, b"a".to_vec()),
        );
    let harness = Harness::new(runner).await;

    harness
        .context
        .controller
        .build_payload("states", template_plan(&harness, 9))
        .await
        .unwrap();

    assert_eq!(
        harness.progress.states("states"),
        vec![
            "accepted",
            "running transport",
            "transport passed",
            "running agent",
            "agent passed",
            "finalizing",
            "succeeded",
        ]
    );
}

#[tokio::test]
async fn test_upload_failure_keeps_relocated_artifact() {
    let runner = MockProcessRunner::new()
        .on(
            TRANSPORT_COMMAND,
            MockStage::exit(0).writes(TRANSPORT_OUTPUT, b"t".to_vec()),
        )
        .on(
            "./format.sh",
            MockStage::exit(0).writes(FORMAT_OUTPUT, b"agent".to_vec()),
        );
    let harness = Harness::with_store(runner, RecordingStore::rejecting()).await;

    let error = harness
        .context
        .controller
        .build_payload("upload", template_plan(&harness, 3))
        .await
        .unwrap_err();

    match error {
        BuildError::PublishFailure { path, .. } => {
            assert!(path.exists());
            assert_eq!(std::fs::read(&path).unwrap(), b"agent");
        }
        other => panic!("expected PublishFailure, got {:?}", other),
    }
    assert_eq!(
        harness.progress.states("upload").last().map(String::as_str),
        Some("failed")
    );
}

#[tokio::test]
async fn test_stored_agent_output_survives_repeated_builds() {
    let runner = MockProcessRunner::new().on(
        TRANSPORT_COMMAND,
        MockStage::exit(0).writes(TRANSPORT_OUTPUT, b"t".to_vec()),
    );
    let harness = Harness::new(runner).await;
    let stored = harness.agent_dir().join("prebuilt/agent.exe");
    std::fs::create_dir_all(stored.parent().unwrap()).unwrap();
    std::fs::write(&stored, b"prebuilt-agent").unwrap();

    let mut plan = template_plan(&harness, 8);
    plan.agent = StageSpec::new(AGENT_STAGE, None, "prebuilt/agent.exe");
    let controller = &harness.context.controller;

    let first = controller.build_payload("stored-1", plan.clone()).await.unwrap();
    assert!(stored.exists());
    let second = controller.build_payload("stored-2", plan).await.unwrap();

    assert!(stored.exists());
    assert_ne!(first.path, second.path);
    assert_eq!(harness.runner.invocation_count(), 2);
    let uploads = harness.store.uploads();
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().all(|u| u.2 == b"prebuilt-agent"));
}

#[tokio::test]
async fn test_stored_module_output_is_read_without_running_anything() {
    let harness = Harness::new(MockProcessRunner::new()).await;
    let stored = harness.module_dir().join(MODULE_OUTPUT);
    std::fs::create_dir_all(harness.module_dir()).unwrap();
    std::fs::write(&stored, b"stored-module").unwrap();
    let stage = StageSpec::new(MODULE_STAGE, None, MODULE_OUTPUT);

    for run in ["m-1", "m-2"] {
        let data = harness
            .context
            .controller
            .build_module(run, &harness.module_dir(), &stage)
            .await
            .unwrap();
        assert_eq!(Base64::decode_vec(&data).unwrap(), b"stored-module");
    }
    assert_eq!(harness.runner.invocation_count(), 0);
    assert!(stored.exists());
}

#[tokio::test]
async fn test_back_to_back_builds_get_distinct_artifacts() {
    let runner = MockProcessRunner::new()
        .on(
            TRANSPORT_COMMAND,
            MockStage::exit(0).writes(TRANSPORT_OUTPUT, b"t".to_vec()),
        )
        .on(
            "./format.sh",
            MockStage::exit(0).writes(FORMAT_OUTPUT, b"agent".to_vec()),
        );
    let harness = Harness::new(runner).await;
    let controller = &harness.context.controller;

    let first = controller
        .build_payload("same-1", template_plan(&harness, 1))
        .await
        .unwrap();
    let second = controller
        .build_payload("same-2", template_plan(&harness, 2))
        .await
        .unwrap();

    assert_ne!(first.path, second.path);
    assert!(first.path.exists());
    assert!(second.path.exists());
}

async fn join_all<T>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<T> {
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}
