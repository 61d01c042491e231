//! CLI integration tests

use std::process::{Command, Output};

fn fleetctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleetctl"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("FLEETCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = fleetctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("fleetscale"), "Should show app name");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("samples"), "Should show samples command");
    assert!(stdout.contains("health"), "Should show health command");
    assert!(stdout.contains("simulate"), "Should show simulate command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = fleetctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("fleetctl"), "Should show binary name");
}

#[test]
fn test_simulate_help() {
    let output = fleetctl(&["simulate", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--threshold"));
    assert!(stdout.contains("--trigger-count"));
}

#[test]
fn test_simulate_json_reports_streaks() {
    let output = fleetctl(&[
        "--format",
        "json",
        "simulate",
        "--threshold",
        "80",
        "--trigger-count",
        "3",
        "85",
        "90",
        "82",
        "50",
    ]);
    assert!(output.status.success(), "simulate should succeed");

    let steps: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let steps = steps.as_array().unwrap();
    let streaks: Vec<u64> = steps.iter().map(|s| s["streak"].as_u64().unwrap()).collect();

    assert_eq!(streaks, vec![1, 2, 0, 0]);
    assert_eq!(steps[2]["decision"], "scale_up");
    assert_eq!(steps[3]["decision"], "hold");
}

#[test]
fn test_simulate_table() {
    let output = fleetctl(&["simulate", "--threshold", "50", "60", "70"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Scale-ups: 0"));
}

#[test]
fn test_simulate_requires_readings() {
    let output = fleetctl(&["simulate", "--threshold", "80"]);
    assert!(!output.status.success());
}

#[test]
fn test_simulate_rejects_threshold_out_of_range() {
    let output = fleetctl(&["simulate", "--threshold", "150", "90"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("threshold"));
}

#[test]
fn test_status_without_daemon_fails() {
    let output = fleetctl(&["--api-url", "http://127.0.0.1:1", "status"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_format_rejected() {
    let output = fleetctl(&["--format", "yaml", "health"]);
    assert!(!output.status.success());
}
