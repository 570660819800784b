//! Crews loaded from definition files.

use std::collections::HashMap;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use crew::{CapabilityRegistry, Config, CrewDefinition, Error, FailurePolicy};

fn demo_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/data_analysis.toml"))
}

#[tokio::test]
async fn test_demo_definition_runs() {
    let definition = CrewDefinition::load(demo_path()).unwrap();
    assert_eq!(definition.name, "data-analysis");
    assert_eq!(definition.failure_policy, Some(FailurePolicy::BestEffort));

    let crew = definition
        .build(&CapabilityRegistry::default(), &Config::default())
        .unwrap();
    assert_eq!(crew.name(), "data-analysis");
    assert_eq!(crew.policy(), FailurePolicy::BestEffort);

    let output = crew.kickoff_with_inputs(definition.inputs()).await.unwrap();
    assert!(output.is_success());

    let values: Vec<_> = output.outputs_in_order().iter().map(|o| &o.value).collect();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["count"], json!(7));
    assert_eq!(values[0]["min"], json!(9.0));
    assert_eq!(values[0]["max"], json!(30.0));
    assert_eq!(values[1], &json!("Summary of weekly signups is ready"));
}

#[tokio::test]
async fn test_cli_style_inputs_override_definition_inputs() {
    let definition = CrewDefinition::load(demo_path()).unwrap();
    let crew = definition
        .build(&CapabilityRegistry::default(), &Config::default())
        .unwrap();

    let mut inputs = definition.inputs();
    inputs.extend(HashMap::from([(
        "dataset".to_string(),
        "quarterly sales".to_string(),
    )]));
    let output = crew.kickoff_with_inputs(inputs).await.unwrap();

    assert_eq!(
        output.final_output().unwrap().value,
        json!("Summary of quarterly sales is ready")
    );
}

#[test]
fn test_explicit_policy_beats_definition_policy() {
    let definition = CrewDefinition::load(demo_path()).unwrap();
    let config = Config::default();
    let registry = CapabilityRegistry::default();

    let crew = definition
        .build_with_policy(&registry, &config, Some(FailurePolicy::FailFast))
        .unwrap();
    assert_eq!(crew.policy(), FailurePolicy::FailFast);

    // Without an override the file still wins over the config.
    let crew = definition.build(&registry, &config).unwrap();
    assert_eq!(crew.policy(), FailurePolicy::BestEffort);
}

#[tokio::test]
async fn test_json_definition() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crew.json");
    std::fs::write(
        &path,
        r#"{
            "name": "json-crew",
            "agents": [
                { "role": "Counter", "goal": "Count", "capability": "length" }
            ],
            "tasks": [
                { "name": "count", "description": "hello", "agent": "Counter" }
            ]
        }"#,
    )
    .unwrap();

    let definition = CrewDefinition::load(&path).unwrap();
    let crew = definition
        .build(&CapabilityRegistry::default(), &Config::default())
        .unwrap();
    let output = crew.kickoff().await.unwrap();

    assert_eq!(output.final_output().unwrap().value, json!(5));
}

#[tokio::test]
async fn test_failing_definition_under_config_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("crew.toml");
    std::fs::write(
        &path,
        r#"
[[agents]]
role = "Broken"
goal = "Fail"
capability = "fail"

[[agents]]
role = "Echo"
goal = "Repeat"
capability = "echo"

[[tasks]]
name = "first"
description = "will fail"
agent = "Broken"

[[tasks]]
name = "second"
description = "never runs"
agent = "Echo"
depends_on = ["first"]
"#,
    )
    .unwrap();

    let definition = CrewDefinition::load(&path).unwrap();
    let crew = definition
        .build(&CapabilityRegistry::default(), &Config::default())
        .unwrap();

    match crew.kickoff().await {
        Err(Error::Execution { task, message }) => {
            assert_eq!(task, "first");
            assert_eq!(message, "task failed");
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }
}

#[test]
fn test_unknown_capability_is_reported() {
    let definition = CrewDefinition::from_toml_str(
        r#"
[[agents]]
role = "Oracle"
goal = "Predict"
capability = "crystal-ball"
"#,
    )
    .unwrap();

    let err = definition
        .build(&CapabilityRegistry::default(), &Config::default())
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("crystal-ball"), "got {}", message);
    assert!(message.contains("stats"), "got {}", message);
}

#[tokio::test]
async fn test_definition_cycle_found_at_kickoff() {
    let definition = CrewDefinition::from_toml_str(
        r#"
[[agents]]
role = "Echo"
goal = "Repeat"
capability = "echo"

[[tasks]]
name = "a"
description = "a"
agent = "Echo"
depends_on = ["b"]

[[tasks]]
name = "b"
description = "b"
agent = "Echo"
depends_on = ["a"]
"#,
    )
    .unwrap();

    let crew = definition
        .build(&CapabilityRegistry::default(), &Config::default())
        .unwrap();
    assert!(matches!(
        crew.validate().await,
        Err(Error::CycleDetected { .. })
    ));
}
