//! Smoke test for the demo binary.

use std::fs;

use assert_cmd::Command;

#[test]
fn run_subcommand_prints_a_response() {
    let path = std::env::temp_dir().join(format!("voxpilot-intent-{}.json", std::process::id()));
    fs::write(
        &path,
        r#"{ "intent": "NAVIGATE", "parameters": { "target": "example.com" } }"#,
    )
    .unwrap();

    let output = Command::cargo_bin("voxpilot")
        .unwrap()
        .arg("run")
        .arg(&path)
        .arg("--stats")
        .output()
        .unwrap();

    fs::remove_file(&path).ok();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("\"status\": \"Succeeded\""));
    assert!(stdout.contains("https://example.com"));
    assert!(stdout.contains("\"workflows_completed\": 1"));
}

#[test]
fn sessions_subcommand_reports_empty() {
    let output = Command::cargo_bin("voxpilot")
        .unwrap()
        .arg("sessions")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("no live sessions"));
}
