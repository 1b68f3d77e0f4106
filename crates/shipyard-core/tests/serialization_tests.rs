//! Parsing and serialization tests for shipyard-core types.

use shipyard_core::artifact::ArtifactKey;
use shipyard_core::event::TriggerEvent;
use shipyard_core::gate::Predicate;
use shipyard_core::ids::*;
use shipyard_core::pipeline::*;
use shipyard_core::run::*;
use std::collections::BTreeMap;

const RELEASE_PIPELINE: &str = include_str!("../../../demos/release-pipeline.yaml");

#[test]
fn test_parse_release_pipeline() {
    let pipeline = PipelineDefinition::from_yaml(RELEASE_PIPELINE).expect("parse");

    assert_eq!(pipeline.name, "native-release");
    assert_eq!(pipeline.max_runners(), Some(6));
    assert_eq!(pipeline.triggers.len(), 4);
    let names: Vec<&str> = pipeline.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["verify", "build-native", "package"]);

    let manual = &pipeline.triggers[3];
    assert_eq!(manual.kind, EventKind::ManualDispatch);
    assert_eq!(
        manual.inputs.get("publish").and_then(|i| i.default.as_deref()),
        Some("false")
    );

    let build = pipeline.group("build-native").expect("build group");
    let matrix = build.matrix.as_ref().expect("matrix");
    assert_eq!(matrix.axes[0].name, "os");
    assert_eq!(matrix.axes[0].values.len(), 3);
    assert_eq!(matrix.include.len(), 3);
}

#[test]
fn test_publish_step_gate_parses() {
    let pipeline = PipelineDefinition::from_yaml(RELEASE_PIPELINE).expect("parse");
    let package = pipeline.group("package").expect("package group");

    let publish = package
        .steps
        .iter()
        .find(|s| s.name == "publish")
        .expect("publish step");
    assert_eq!(publish.condition, Some(Predicate::publish_gate()));
    assert_eq!(publish.credentials, vec!["TWINE_USERNAME", "TWINE_PASSWORD"]);

    let test_wheel = package.steps.iter().find(|s| s.name == "test-wheel").unwrap();
    assert!(test_wheel.continue_on_error);
    assert!(test_wheel.condition.is_none());
}

#[test]
fn test_minimal_pipeline_defaults() {
    let yaml = r#"
name: tiny
groups:
  - name: only
    steps:
      - name: hello
        run: echo hello
"#;
    let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
    assert_eq!(pipeline.version, "1");
    assert_eq!(pipeline.timeout_minutes, 60);
    assert!(pipeline.max_runners().is_none());

    let step = &pipeline.groups[0].steps[0];
    assert_eq!(step.shell, "sh");
    assert!(!step.continue_on_error);
    assert!(pipeline.groups[0].matrix.is_none());
}

#[test]
fn test_malformed_yaml_is_serialization_error() {
    let err = PipelineDefinition::from_yaml("name: [unterminated").unwrap_err();
    assert!(matches!(err, shipyard_core::Error::Serialization(_)));
}

#[test]
fn test_run_report_roundtrip() {
    let binding = MatrixBinding::from_pairs([("os", "linux")]);
    let instance = JobInstance {
        id: JobId::new(),
        group: "verify".to_string(),
        index: 0,
        binding: binding.clone(),
        variables: BTreeMap::new(),
        display_name: "verify (os=linux)".to_string(),
        timeout_seconds: 3600,
    };
    let outcome = JobOutcome::failed(FailureKind::StepFailed, Some("test".into()), "exit 1");

    let run = Run {
        id: RunId::new(),
        pipeline_name: "native-release".to_string(),
        event: TriggerEvent::push("main"),
        status: RunStatus::Failed,
        error: None,
        groups: vec![GroupRun {
            name: "verify".to_string(),
            status: GroupStatus::Failed,
            reason: None,
            jobs: vec![JobRecord { instance, outcome }],
        }],
        started_at: None,
        completed_at: None,
        duration_ms: Some(10),
    };

    let report = run.report();
    let json = serde_json::to_string(&report).expect("serialize");
    let parsed: RunReport = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(parsed.status, RunStatus::Failed);
    assert_eq!(parsed.groups[0].cells[0].binding, "os=linux");
    assert_eq!(parsed.groups[0].cells[0].failed_step.as_deref(), Some("test"));
    assert_eq!(parsed.groups[0].cells[0].failure, Some(FailureKind::StepFailed));
    assert_eq!(run.failed_jobs().len(), 1);
}

#[test]
fn test_artifact_key_json_roundtrip() {
    let key = ArtifactKey::new(
        "build-native",
        MatrixBinding::from_pairs([("os", "macos")]),
        "native-lib",
    );
    let json = serde_json::to_string(&key).unwrap();
    let parsed: ArtifactKey = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, key);
}
