//! The [SweepTarget] for the Splunk firehose nozzle.

use super::{path_arg, RunTarget, SweepCase, SweepTarget};
use crate::config::NozzleConfig;
use crate::executor::CommandInvocation;
use eyre::Result;
use std::path::Path;
use std::time::Duration;

/// The firehose event types that the nozzle subscribes to during a sweep.
static SWEEP_EVENTS: &str =
    "ContainerMetric,CounterEvent,Error,HttpStart,HttpStartStop,HttpStop,LogMessage,ValueMetric";

/// Sweeps the nozzle, forwarding every firehose event type to Splunk.
pub struct NozzleTarget {
    config: NozzleConfig,
}

impl NozzleTarget {
    /// Constructs a new [NozzleTarget].
    pub fn new(config: NozzleConfig) -> NozzleTarget {
        NozzleTarget { config }
    }
}

impl SweepTarget for NozzleTarget {
    fn run_target(&self) -> RunTarget {
        RunTarget::Nozzle
    }

    fn binary(&self) -> &Path {
        &self.config.binary
    }

    /// The nozzle has no duration flag of its own: it runs until the firehose feeding it dries up, and the
    /// `duration` is only used to judge whether the run was long enough.
    fn invocation(&self, case: &SweepCase, duration: Duration) -> Result<CommandInvocation> {
        let config = &self.config;
        let args = vec![
            path_arg(&config.binary),
            "--api-endpoint".into(),
            config.api_endpoint.clone(),
            "--user".into(),
            config.user.clone(),
            "--password".into(),
            config.password.clone(),
            "--splunk-host".into(),
            config.splunk_host.clone(),
            "--splunk-token".into(),
            config.splunk_token.clone(),
            "--splunk-index".into(),
            config.splunk_index.clone(),
            "--hec-workers".into(),
            case.hec.hec_workers.to_string(),
            "--hec-batch-size".into(),
            case.hec.hec_batch_size.to_string(),
            "--events".into(),
            SWEEP_EVENTS.into(),
            "--extra-fields".into(),
            case.extra_fields(),
            "--add-app-info".into(),
            "--enable-event-tracing".into(),
            "--skip-ssl-validation-cf".into(),
            "--skip-ssl-validation-splunk".into(),
        ];

        CommandInvocation::new(args, duration)
    }
}
