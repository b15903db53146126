//! Contains the `run_sweep(...)` method and the result types for a sweep.

use crate::config::AppConfig;
use crate::executor::{CommandRunner, ExecutionRecord, RetryExecutor};
use crate::targets::{sweep_cases, RunTarget, SweepCase, SweepTarget};
use crate::util::serde_duration_millis;
use chrono::prelude::*;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Stores the complete set of results from a sweep.
#[derive(Clone, Deserialize, Serialize)]
pub struct SweepResults {
    /// When the sweep started, in wall clock time.
    pub started: DateTime<Utc>,

    /// When the sweep completed, in wall clock time.
    pub completed: Option<DateTime<Utc>>,

    /// The binary that was swept.
    pub target: RunTarget,

    /// How long each run was expected to last.
    #[serde(with = "serde_duration_millis")]
    pub target_duration: Duration,

    /// The configuration that the sweep was run with. Secrets are never serialized.
    pub config: AppConfig,

    /// Details on the system used to run the sweep.
    pub harness_metadata: HarnessMetadata,

    /// The [CaseResult] for each case that was run, in sweep order.
    pub cases: Vec<CaseResult>,
}

impl SweepResults {
    /// Constructs a new `SweepResults` instance, with no cases run yet.
    ///
    /// Params:
    /// * `config`: the application's configuration
    /// * `target`: the binary being swept
    /// * `target_duration`: how long each run is expected to last
    pub fn new(config: &AppConfig, target: RunTarget, target_duration: Duration) -> SweepResults {
        SweepResults {
            started: Utc::now(),
            completed: None,
            target,
            target_duration,
            config: config.clone(),
            harness_metadata: HarnessMetadata::default(),
            cases: vec![],
        }
    }

    /// Returns the number of cases that exhausted their retry budget without an accepted run.
    pub fn exhausted_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.execution.is_ok()).count()
    }
}

/// Stores details on the build and system used to run the sweep.
#[derive(Deserialize, Clone, Serialize)]
pub struct HarnessMetadata {
    /// Whether the harness was compiled in debug or release mode.
    pub cargo_profile: String,

    /// When the harness was built.
    pub build_timestamp: String,

    /// The number of CPU cores available to the system (which may include virtual/hyperthread cores).
    pub cpu_core_count: Option<u16>,

    /// The brand name of the CPUs.
    pub cpu_brand_name: String,
}

impl Default for HarnessMetadata {
    /// Constructs a new [HarnessMetadata] instance from the build metadata, where available.
    fn default() -> Self {
        HarnessMetadata {
            cargo_profile: option_env!("VERGEN_CARGO_PROFILE")
                .unwrap_or("unknown")
                .to_string(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("unknown")
                .to_string(),
            cpu_core_count: option_env!("VERGEN_SYSINFO_CPU_CORE_COUNT")
                .and_then(|count| count.parse::<u16>().ok()),
            cpu_brand_name: option_env!("VERGEN_SYSINFO_CPU_BRAND")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// Stores the result of a single sweep case.
#[derive(Deserialize, Clone, Serialize)]
pub struct CaseResult {
    /// The case that was run.
    pub case: SweepCase,

    /// The [ExecutionRecord] detailing every attempt at the case.
    pub execution: ExecutionRecord,
}

/// Runs every [SweepCase] against the specified target, one at a time, blocking the calling thread until
/// the whole sweep is done. A case that exhausts its retry budget is recorded as such, and the sweep moves
/// on to the next case.
///
/// Parameters:
/// * `config`: the application's [AppConfig]
/// * `target`: the [SweepTarget] to run the cases against
/// * `target_duration`: how long each run is expected to last
/// * `runner`: the [CommandRunner] to run each case's command with
///
/// Returns the [SweepResults] for every case.
#[tracing::instrument(level = "info", skip(config, target, runner), fields(run_target = %target.run_target()))]
pub fn run_sweep<R: CommandRunner>(
    config: &AppConfig,
    target: &dyn SweepTarget,
    target_duration: Duration,
    runner: R,
) -> Result<SweepResults> {
    let executor = RetryExecutor::new(config.retry.clone(), runner);
    let mut results = SweepResults::new(config, target.run_target(), target_duration);

    let cases = sweep_cases();
    let case_count = cases.len();
    for (index, case) in cases.into_iter().enumerate() {
        let invocation = target
            .invocation(&case, target_duration)
            .with_context(|| format!("Unable to build the command for case '{}'.", case))?;

        info!("case {}/{}: '{}'", index + 1, case_count, case);
        let execution = executor.execute(&invocation);
        results.cases.push(CaseResult { case, execution });

        let pause = target.pause_after_case();
        if pause > Duration::from_secs(0) {
            std::thread::sleep(pause);
        }
    }

    results.completed = Some(Utc::now());
    Ok(results)
}

/// Unit tests for the sweep and its result structures.
///
/// Note: these tests will all fail unless the `serde_json` crate has the `preserve_order` feature enabled,
/// as otherwise serde serialization does not preserve field order.
#[cfg(test)]
mod tests {
    use super::{run_sweep, CaseResult, HarnessMetadata, SweepResults};
    use crate::config::AppConfig;
    use crate::executor::{
        AttemptLog, AttemptVerdict, CommandInvocation, CommandRunner, ExecutionOutcome,
        ExecutionRecord, ExecutionStatus, RetryBudget,
    };
    use crate::targets::{
        HecParams, MessageType, NozzleTarget, RunTarget, SweepCase, TrafficControllerTarget,
    };
    use chrono::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A [CommandRunner] that records each command line and reports a run of a fixed length.
    struct RecordingRunner {
        elapsed: Duration,
        commands: Mutex<Vec<String>>,
    }

    impl CommandRunner for &RecordingRunner {
        fn run(&self, invocation: &CommandInvocation) -> ExecutionOutcome {
            self.commands
                .lock()
                .unwrap()
                .push(invocation.display_line());
            let started = Utc::now();
            ExecutionOutcome {
                started,
                completed: started,
                elapsed: self.elapsed,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                error: None,
            }
        }
    }

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    /// Verifies that a sweep where every run is long enough runs each case exactly once, in order.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn sweep_all_succeed() {
        let config = config(&[("TRAFFIC_CONTROLLER_PAUSE_MS", "0")]);
        let target = TrafficControllerTarget::new(config.traffic_controller.clone());
        let runner = RecordingRunner {
            elapsed: Duration::from_secs(5),
            commands: Mutex::new(vec![]),
        };

        let results = run_sweep(&config, &target, Duration::from_secs(5), &runner).unwrap();

        assert_eq!(48, results.cases.len());
        assert_eq!(0, results.exhausted_count());
        assert!(results.completed.is_some());
        assert_eq!(RunTarget::TrafficController, results.target);

        let commands = runner.commands.lock().unwrap();
        assert_eq!(48, commands.len());
        assert!(commands[0].ends_with("--message-type s256byte"));
        assert!(commands[47].ends_with("--message-type uns1kbyte"));
    }

    /// Verifies that exhausted cases are recorded, and don't stop the sweep.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn sweep_continues_past_exhausted_cases() {
        let config = config(&[
            ("NOZZLE_PERF_MAX_ATTEMPTS", "2"),
            ("NOZZLE_PERF_SHORT_RUN_DELAY_MS", "0"),
        ]);
        let target = NozzleTarget::new(config.nozzle.clone());
        let runner = RecordingRunner {
            elapsed: Duration::from_millis(100),
            commands: Mutex::new(vec![]),
        };

        let results = run_sweep(&config, &target, Duration::from_secs(10), &runner).unwrap();

        assert_eq!(48, results.cases.len());
        assert_eq!(48, results.exhausted_count());
        assert_eq!(96, runner.commands.lock().unwrap().len());
        for case_result in &results.cases {
            assert_eq!(
                ExecutionStatus::Exhausted(RetryBudget::MaxAttempts(2)),
                case_result.execution.status
            );
        }
    }

    /// Verifies that credentials never make it into the serialized results.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn results_redact_secrets() {
        let config = config(&[
            ("API_PASSWORD", "hunter2"),
            ("SPLUNK_TOKEN", "token-1234"),
        ]);
        let target = NozzleTarget::new(config.nozzle.clone());
        let runner = RecordingRunner {
            elapsed: Duration::from_secs(1),
            commands: Mutex::new(vec![]),
        };

        let results = run_sweep(&config, &target, Duration::from_secs(1), &runner).unwrap();
        let results = serde_json::to_string(&results).unwrap();

        assert!(!results.contains("hunter2"));
        assert!(!results.contains("token-1234"));
        assert!(runner
            .commands
            .lock()
            .unwrap()
            .iter()
            .all(|c| !c.contains("hunter2") && !c.contains("token-1234")));
    }

    /// Verifies that [CaseResult] serializes as expected.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn serialize_case_result() {
        let expected = json!({
            "case": {
                "message_type": "uns256byte",
                "hec": {
                    "hec_workers": 4,
                    "hec_batch_size": 1000,
                },
            },
            "execution": {
                "command": ["./trafficcontroller", "--duration", "60"],
                "target_duration": 60000,
                "attempts": [{
                    "started": "2020-01-01T13:00:00Z",
                    "completed": "2020-01-01T13:00:01.500Z",
                    "elapsed": "PT1.500S",
                    "exit_code": 1,
                    "stdout": "",
                    "stderr": "connection refused\n",
                    "error": null,
                    "verdict": "too_short",
                }, {
                    "started": "2020-01-01T13:00:02.500Z",
                    "completed": "2020-01-01T13:01:02.500Z",
                    "elapsed": "PT60.000S",
                    "exit_code": 0,
                    "stdout": "done\n",
                    "stderr": "",
                    "error": null,
                    "verdict": "accepted",
                }],
                "status": "Succeeded",
            },
        });
        let expected = serde_json::to_string(&expected).unwrap();
        let started = Utc.with_ymd_and_hms(2020, 1, 1, 13, 0, 0).unwrap();
        let actual = CaseResult {
            case: SweepCase {
                message_type: MessageType::Unstructured256Byte,
                hec: HecParams {
                    hec_workers: 4,
                    hec_batch_size: 1000,
                },
            },
            execution: ExecutionRecord {
                command: vec!["./trafficcontroller".into(), "--duration".into(), "60".into()],
                target_duration: Duration::from_secs(60),
                attempts: vec![
                    AttemptLog {
                        started,
                        completed: started + chrono::Duration::milliseconds(1500),
                        elapsed: chrono::Duration::milliseconds(1500),
                        exit_code: Some(1),
                        stdout: String::new(),
                        stderr: "connection refused\n".into(),
                        error: None,
                        verdict: AttemptVerdict::TooShort,
                    },
                    AttemptLog {
                        started: started + chrono::Duration::milliseconds(2500),
                        completed: started + chrono::Duration::milliseconds(62500),
                        elapsed: chrono::Duration::seconds(60),
                        exit_code: Some(0),
                        stdout: "done\n".into(),
                        stderr: String::new(),
                        error: None,
                        verdict: AttemptVerdict::Accepted,
                    },
                ],
                status: ExecutionStatus::Succeeded,
            },
        };
        let actual = serde_json::to_string(&actual).unwrap();
        similar_asserts::assert_eq!(expected, actual);
    }

    /// Verifies that an exhausted [ExecutionStatus] serializes with its budget.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn serialize_exhausted_status() {
        let expected = json!({"Exhausted": {"MaxElapsed": 3600000}});
        let actual = ExecutionStatus::Exhausted(RetryBudget::MaxElapsed(Duration::from_secs(3600)));
        assert_eq!(expected, serde_json::to_value(&actual).unwrap());

        let expected = json!({"Exhausted": {"MaxAttempts": 20}});
        let actual = ExecutionStatus::Exhausted(RetryBudget::MaxAttempts(20));
        assert_eq!(expected, serde_json::to_value(&actual).unwrap());
    }

    /// Verifies that [SweepResults] round trips through JSON, as downstream tooling reads it back in.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn sweep_results_deserialize() {
        let config = config(&[]);
        let mut results = SweepResults::new(&config, RunTarget::Nozzle, Duration::from_secs(90));
        results.harness_metadata = HarnessMetadata {
            cargo_profile: "release".into(),
            build_timestamp: "2020-01-01T12:00:00Z".into(),
            cpu_core_count: Some(64),
            cpu_brand_name: "Very Awesome CPU".into(),
        };
        let json = serde_json::to_string_pretty(&results).unwrap();

        let parsed: SweepResults = serde_json::from_str(&json).unwrap();
        assert_eq!(RunTarget::Nozzle, parsed.target);
        assert_eq!(Duration::from_secs(90), parsed.target_duration);
        assert_eq!(Some(64), parsed.harness_metadata.cpu_core_count);
        assert_eq!("", parsed.config.nozzle.password);
        assert!(parsed.cases.is_empty());
    }
}
