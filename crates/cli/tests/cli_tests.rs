//! CLI integration tests

use std::process::{Command, Output};

fn ecoopt(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ecoopt"))
        .args(args)
        .env_remove("ECOOPT_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = ecoopt(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("EcoOptimizer"), "Should show app name");
    for command in [
        "servers", "usage", "optimize", "allocate", "predict", "forecast", "train", "model",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = ecoopt(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("ecoopt"), "Should show binary name");
}

#[test]
fn test_forecast_help() {
    let output = ecoopt(&["forecast", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Forecast help should succeed");
    assert!(stdout.contains("--hours"), "Should show hours option");
    assert!(stdout.contains("--fallback"), "Should show fallback option");
    assert!(stdout.contains("zero"), "Should list the zero fallback");
}

#[test]
fn test_predict_help() {
    let output = ecoopt(&["predict", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Predict help should succeed");
    assert!(stdout.contains("--at"), "Should show at option");
}

#[test]
fn test_model_help() {
    let output = ecoopt(&["model", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Model help should succeed");
    assert!(stdout.contains("show"), "Should show show subcommand");
    assert!(stdout.contains("rollback"), "Should show rollback subcommand");
}

/// Test format and api-url options
#[test]
fn test_global_options() {
    let output = ecoopt(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("ECOOPT_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = ecoopt(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

#[test]
fn test_allocate_requires_numeric_load() {
    let output = ecoopt(&["allocate"]);
    assert!(!output.status.success(), "Missing load should fail");

    let output = ecoopt(&["allocate", "lots"]);
    assert!(!output.status.success(), "Non-numeric load should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid"), "Should report invalid value");
}

#[test]
fn test_allocate_accepts_negative_load() {
    // Parsed as a value and sent on, so the server can reject it
    let output = ecoopt(&["--api-url", "http://127.0.0.1:9", "allocate", "-5"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1), "Should not be a usage error");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("unexpected argument"));
    assert!(stderr.contains("Failed to send request"));
}

#[test]
fn test_predict_rejects_malformed_timestamp() {
    let output = ecoopt(&["predict", "--at", "tomorrow"]);
    assert!(!output.status.success(), "Malformed timestamp should fail");
}

#[test]
fn test_unreachable_api_fails() {
    // Port 9 (discard) is not expected to run an HTTP server
    let output = ecoopt(&["--api-url", "http://127.0.0.1:9", "servers"]);
    assert!(!output.status.success(), "Unreachable API should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
