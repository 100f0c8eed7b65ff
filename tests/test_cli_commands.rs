mod common;

use common::SortieProcess;
use serde_json::Value;

#[test]
fn validate_fixture_config() {
    let config = SortieProcess::fixture_path("sortie.yaml");
    let output = SortieProcess::spawn_command(&["server", "validate", config.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "validate should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn validate_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "server:\n  bind: nowhere\n").unwrap();

    let output = SortieProcess::spawn_command(&["server", "validate", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn mission_validate_and_inspect() {
    let mission = SortieProcess::fixture_path("missions/drill.json");
    let path = mission.to_str().unwrap();

    let output = SortieProcess::spawn_command(&["mission", "validate", path, "--format", "json"]);
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report[0]["valid"], true);

    let output = SortieProcess::spawn_command(&["mission", "inspect", path, "--format", "json"]);
    assert!(output.status.success());
    let outline: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outline["seed"], "abc");
    assert_eq!(outline["forces"][0]["nodes"][1]["actions"][0]["outcomes"], 3);
}

#[test]
fn mission_validate_rejects_broken_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"{"id": "x", "name": "", "prototypes": [], "forces": []}"#).unwrap();

    let output = SortieProcess::spawn_command(&["mission", "validate", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stdout).contains("FAILED"));
}

#[test]
fn version_json() {
    let output = SortieProcess::spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success());
    let version: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(version["name"], "sortie");
}
