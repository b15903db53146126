//! The bounded retry executor, which runs an external command until it produces a run that is both long
//! enough and free of invocation errors.
//!
//! The binaries swept by this harness sometimes exit early: they crash, choke on their configuration, or
//! run out of synthetic input before the measurement window closes. A throughput sample is only valid if
//! it covers (most of) the requested duration, so short runs are thrown away and retried. Retries are
//! bounded by a [RetryPolicy]; a command that never produces a valid run ends up
//! [ExecutionStatus::Exhausted] rather than looping forever.

use crate::util::{serde_duration_iso8601, serde_duration_millis};
use chrono::prelude::*;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The flags whose following argument is a credential, and so must never be logged or reported.
static SECRET_FLAGS: &[&str] = &["--password", "--splunk-token"];

/// The placeholder that replaces redacted arguments.
static REDACTED: &str = "<redacted>";

/// An external command to run, along with how long a valid run of it is expected to last.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandInvocation {
    args: Vec<String>,
    target_duration: Duration,
}

impl CommandInvocation {
    /// Constructs a new [CommandInvocation].
    ///
    /// Parameters:
    /// * `args`: the program to run, followed by its arguments
    /// * `target_duration`: how long the command is expected to run for
    pub fn new(args: Vec<String>, target_duration: Duration) -> Result<CommandInvocation> {
        if args.is_empty() {
            return Err(eyre!("A command invocation needs at least a program to run."));
        }
        if target_duration == Duration::from_secs(0) {
            return Err(eyre!("A command invocation's target duration must be positive."));
        }

        Ok(CommandInvocation {
            args,
            target_duration,
        })
    }

    /// Returns the program to run.
    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// Returns the arguments to pass to the program.
    pub fn program_args(&self) -> &[String] {
        &self.args[1..]
    }

    /// Returns how long the command is expected to run for.
    pub fn target_duration(&self) -> Duration {
        self.target_duration
    }

    /// Returns the program and its arguments, with any credentials replaced by a placeholder.
    pub fn redacted_args(&self) -> Vec<String> {
        let mut redacted = Vec::with_capacity(self.args.len());
        let mut previous_is_secret_flag = false;
        for arg in &self.args {
            if previous_is_secret_flag {
                redacted.push(REDACTED.to_owned());
            } else {
                redacted.push(arg.clone());
            }
            previous_is_secret_flag = SECRET_FLAGS.contains(&arg.as_str());
        }
        redacted
    }

    /// Returns the redacted command line, suitable for logging.
    pub fn display_line(&self) -> String {
        self.redacted_args().join(" ")
    }
}

/// The observations from a single attempt at running a [CommandInvocation].
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    /// When the attempt started, in wall clock time.
    pub started: DateTime<Utc>,

    /// When the attempt completed, in wall clock time.
    pub completed: DateTime<Utc>,

    /// How long the attempt ran for, per a monotonic clock.
    pub elapsed: Duration,

    /// The command's captured standard output.
    pub stdout: String,

    /// The command's captured standard error.
    pub stderr: String,

    /// The command's exit code, if it ran and exited normally.
    pub exit_code: Option<i32>,

    /// Why the command could not be run, if it couldn't.
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Returns `true` if the command could not be run at all. Note that a command that ran but exited with
    /// a non-zero code does not count as an error.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs [CommandInvocation]s. This is the seam that lets tests script command behavior.
pub trait CommandRunner {
    /// Runs the specified command once, to completion, and reports what happened.
    ///
    /// Implementations must not panic or return early on failure: any problem running the command is
    /// reported via [ExecutionOutcome::error].
    fn run(&self, invocation: &CommandInvocation) -> ExecutionOutcome;
}

/// The production [CommandRunner], which runs commands as child processes and blocks until they exit.
///
/// No timeout is enforced: a hung child process blocks the calling thread indefinitely.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &CommandInvocation) -> ExecutionOutcome {
        let started = Utc::now();
        let clock = Instant::now();
        let output = Command::new(invocation.program())
            .args(invocation.program_args())
            .output();
        let elapsed = clock.elapsed();
        let completed = Utc::now();

        match output {
            Ok(output) => ExecutionOutcome {
                started,
                completed,
                elapsed,
                stdout: String::from_utf8_lossy(&output.stdout).into(),
                stderr: String::from_utf8_lossy(&output.stderr).into(),
                exit_code: output.status.code(),
                error: None,
            },
            Err(err) => ExecutionOutcome {
                started,
                completed,
                elapsed,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                error: Some(format!("Failed to run '{}': {}", invocation.program(), err)),
            },
        }
    }
}

/// Decides which attempts are accepted, and how long to keep retrying the others.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// The fraction of the target duration that a run must last for to be accepted.
    pub min_duration_ratio: f64,

    /// How long to wait before retrying a run that was too short.
    #[serde(with = "serde_duration_millis")]
    pub short_run_delay: Duration,

    /// The maximum number of attempts to make, or `None` to retry without limit.
    pub max_attempts: Option<u32>,

    /// The maximum wall clock time to spend retrying, or `None` to retry without limit. Only checked
    /// between attempts.
    #[serde(with = "serde_duration_millis::option")]
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            min_duration_ratio: 0.8,
            short_run_delay: Duration::from_secs(1),
            max_attempts: Some(20),
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Judges a single attempt. The checks are applied in order: a run that was too short is
    /// [AttemptVerdict::TooShort] even if it also errored.
    ///
    /// Parameters:
    /// * `outcome`: the [ExecutionOutcome] of the attempt
    /// * `target_duration`: how long the command was expected to run for
    pub fn judge(&self, outcome: &ExecutionOutcome, target_duration: Duration) -> AttemptVerdict {
        if outcome.elapsed.as_secs_f64() < self.min_duration_ratio * target_duration.as_secs_f64() {
            AttemptVerdict::TooShort
        } else if outcome.has_error() {
            AttemptVerdict::Errored
        } else {
            AttemptVerdict::Accepted
        }
    }

    /// Returns the [RetryBudget] that has run out, if any.
    ///
    /// Parameters:
    /// * `attempts`: the number of attempts made so far
    /// * `elapsed`: how long the retry loop has been running for
    fn exhausted_budget(&self, attempts: u32, elapsed: Duration) -> Option<RetryBudget> {
        match (self.max_attempts, self.max_elapsed) {
            (Some(max_attempts), _) if attempts >= max_attempts => {
                Some(RetryBudget::MaxAttempts(max_attempts))
            }
            (_, Some(max_elapsed)) if elapsed >= max_elapsed => {
                Some(RetryBudget::MaxElapsed(max_elapsed))
            }
            _ => None,
        }
    }
}

/// Enumerates the [RetryPolicy]'s possible decisions about a single attempt.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptVerdict {
    /// The run ended before the minimum fraction of its target duration: retry after a delay.
    TooShort,

    /// The run lasted long enough, but the command could not be run properly: retry immediately.
    Errored,

    /// The run lasted long enough and had no errors: stop.
    Accepted,
}

/// Enumerates the retry budgets that a [RetryPolicy] can run out of.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum RetryBudget {
    /// The maximum number of attempts were made.
    MaxAttempts(u32),

    /// The maximum wall clock time was spent.
    MaxElapsed(#[serde(with = "serde_duration_millis")] Duration),
}

/// Enumerates the final outcomes of a retry loop.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ExecutionStatus {
    /// An attempt was accepted.
    Succeeded,

    /// No attempt was accepted before the contained [RetryBudget] ran out.
    Exhausted(RetryBudget),
}

/// Records one attempt from a retry loop.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AttemptLog {
    /// When the attempt started, in wall clock time.
    pub started: DateTime<Utc>,

    /// When the attempt completed, in wall clock time.
    pub completed: DateTime<Utc>,

    /// How long the attempt ran for.
    #[serde(with = "serde_duration_iso8601")]
    pub elapsed: chrono::Duration,

    /// The command's exit code, if it ran and exited normally.
    pub exit_code: Option<i32>,

    /// Everything the command wrote to `stdout`.
    pub stdout: String,

    /// Everything the command wrote to `stderr`.
    pub stderr: String,

    /// Why the command could not be run, if it couldn't.
    pub error: Option<String>,

    /// What the [RetryPolicy] made of the attempt.
    pub verdict: AttemptVerdict,
}

impl AttemptLog {
    fn new(outcome: &ExecutionOutcome, verdict: AttemptVerdict) -> AttemptLog {
        AttemptLog {
            started: outcome.started,
            completed: outcome.completed,
            elapsed: chrono::Duration::from_std(outcome.elapsed)
                .unwrap_or(chrono::Duration::MAX),
            exit_code: outcome.exit_code,
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            error: outcome.error.clone(),
            verdict,
        }
    }
}

/// Records a complete retry loop for one [CommandInvocation].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecutionRecord {
    /// The (redacted) command line that was run.
    pub command: Vec<String>,

    /// How long the command was expected to run for.
    #[serde(with = "serde_duration_millis")]
    pub target_duration: Duration,

    /// Every attempt that was made, in order.
    pub attempts: Vec<AttemptLog>,

    /// How the retry loop ended.
    pub status: ExecutionStatus,
}

impl ExecutionRecord {
    /// Returns `true` if an attempt was accepted.
    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

/// Runs [CommandInvocation]s via a [CommandRunner], retrying per a [RetryPolicy].
pub struct RetryExecutor<R> {
    policy: RetryPolicy,
    runner: R,
}

impl<R: CommandRunner> RetryExecutor<R> {
    /// Constructs a new [RetryExecutor].
    ///
    /// Parameters:
    /// * `policy`: the [RetryPolicy] to apply
    /// * `runner`: the [CommandRunner] to run commands with
    pub fn new(policy: RetryPolicy, runner: R) -> RetryExecutor<R> {
        RetryExecutor { policy, runner }
    }

    /// Runs the specified command until an attempt is accepted or the retry budget runs out, blocking the
    /// calling thread throughout. Problems running the command are logged and retried, never returned.
    ///
    /// Parameters:
    /// * `invocation`: the [CommandInvocation] to run
    ///
    /// Returns the [ExecutionRecord] detailing every attempt.
    #[tracing::instrument(level = "info", skip(self, invocation), fields(command = %invocation.display_line()))]
    pub fn execute(&self, invocation: &CommandInvocation) -> ExecutionRecord {
        let command_line = invocation.display_line();
        let loop_started = Instant::now();
        let mut attempts: Vec<AttemptLog> = vec![];

        let status = loop {
            info!("start {} {}", command_line, Utc::now().to_rfc3339());
            let outcome = self.runner.run(invocation);
            match &outcome.error {
                Some(error) => warn!("{}", error),
                None => {
                    info!("out: {}", outcome.stdout.trim_end());
                    info!("err: {}", outcome.stderr.trim_end());
                    if outcome.exit_code != Some(0) {
                        warn!(exit_code = ?outcome.exit_code, "command exited abnormally");
                    }
                }
            }
            info!(
                "end {} {} duration={:.3}",
                command_line,
                outcome.completed.to_rfc3339(),
                outcome.elapsed.as_secs_f64()
            );

            let verdict = self.policy.judge(&outcome, invocation.target_duration());
            attempts.push(AttemptLog::new(&outcome, verdict));
            match verdict {
                AttemptVerdict::Accepted => break ExecutionStatus::Succeeded,
                AttemptVerdict::TooShort => info!("run too short, retry..."),
                AttemptVerdict::Errored => info!("run errored, retry..."),
            }

            let attempts_made = u32::try_from(attempts.len()).unwrap_or(u32::MAX);
            if let Some(budget) = self
                .policy
                .exhausted_budget(attempts_made, loop_started.elapsed())
            {
                warn!(?budget, "giving up on '{}'", command_line);
                break ExecutionStatus::Exhausted(budget);
            }

            if verdict == AttemptVerdict::TooShort {
                std::thread::sleep(self.policy.short_run_delay);
            }
        };

        ExecutionRecord {
            command: invocation.redacted_args(),
            target_duration: invocation.target_duration(),
            attempts,
            status,
        }
    }
}
