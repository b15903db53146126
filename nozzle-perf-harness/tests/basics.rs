//! Contains the integration tests for this project, which run the harness binary in various configurations
//! and verify the results.

use assert_cmd::Command;
use nozzle_perf_harness::executor::{AttemptVerdict, ExecutionStatus, RetryBudget};
use nozzle_perf_harness::sweep::SweepResults;
use nozzle_perf_harness::targets::RunTarget;

/// Returns a [Command] for the harness binary, with a quick retry policy.
fn harness() -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    cmd.env("NOZZLE_PERF_SHORT_RUN_DELAY_MS", "0")
        .env("TRAFFIC_CONTROLLER_PAUSE_MS", "0")
        .env("RUST_LOG", "warn");
    cmd
}

/// Verifies that the usage is printed.
#[test]
fn help() {
    let output = harness().arg("--help").unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--run"));
    assert!(stdout.contains("--duration"));
    assert!(stdout.contains("--max-attempts"));
}

/// Verifies that the required arguments are enforced.
#[test]
fn missing_args() {
    harness().args(&["--duration", "60"]).assert().failure();
    harness().args(&["--run", "nozzle"]).assert().failure();
    harness()
        .args(&["--run", "nozzle", "--duration", "0"])
        .assert()
        .failure();
}

/// Verifies that a missing nozzle binary stops the run before any case is attempted.
#[test]
fn missing_binary() {
    let output = harness()
        .env("NOZZLE_BINARY", "./definitely-not-a-real-nozzle-binary")
        .args(&["--run", "nozzle", "--duration", "1"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!("", String::from_utf8_lossy(&output.stdout));
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing pre-req"));
}

/// Runs a full sweep against a "nozzle" that exits immediately, and verifies that every case is reported
/// as exhausted rather than as a success.
#[cfg(unix)]
#[test]
fn sweep_of_short_runs() {
    let output = harness()
        .env("NOZZLE_BINARY", "true")
        .env("API_PASSWORD", "hunter2")
        .args(&["--run", "nozzle", "--duration", "1", "--max-attempts", "1"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("hunter2"));

    let sweep_results: SweepResults = serde_json::from_slice(&output.stdout).unwrap();
    assert!(sweep_results.completed.is_some());
    assert_eq!(RunTarget::Nozzle, sweep_results.target);
    assert_eq!(48, sweep_results.cases.len());
    for case_result in &sweep_results.cases {
        assert_eq!(1, case_result.execution.attempts.len());
        assert_eq!(
            AttemptVerdict::TooShort,
            case_result.execution.attempts[0].verdict
        );
        assert_eq!(
            ExecutionStatus::Exhausted(RetryBudget::MaxAttempts(1)),
            case_result.execution.status
        );
    }
    assert!(String::from_utf8_lossy(&output.stderr).contains("48 of 48 sweep cases exhausted"));
}

/// Runs a full traffic controller sweep where every run lasts long enough, and verifies that it succeeds.
#[cfg(unix)]
#[test]
fn sweep_of_full_runs() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("trafficcontroller");
    std::fs::write(
        &script,
        "#!/bin/sh\necho sent all messages\necho dropped 0 messages >&2\nsleep 0.1\n",
    )
    .unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let output = harness()
        .env("TRAFFIC_CONTROLLER_BINARY", &script)
        .env("NOZZLE_PERF_MIN_DURATION_RATIO", "0.05")
        .env("RUST_LOG", "info")
        .args(&["--run", "trafficcontroller", "--duration", "1"])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let sweep_results: SweepResults = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(48, sweep_results.cases.len());
    assert_eq!(0, sweep_results.exhausted_count());
    assert!(sweep_results.cases[0]
        .execution
        .command
        .contains(&"--disableAccessControl".to_string()));

    // Each run's output is both logged and reported.
    let attempt = &sweep_results.cases[0].execution.attempts[0];
    assert_eq!("sent all messages\n", attempt.stdout);
    assert_eq!("dropped 0 messages\n", attempt.stderr);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out: sent all messages"));
    assert!(stderr.contains("err: dropped 0 messages"));
}
