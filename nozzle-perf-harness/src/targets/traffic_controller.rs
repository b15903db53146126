//! The [SweepTarget] for the loggregator traffic controller.

use super::{path_arg, RunTarget, SweepCase, SweepTarget};
use crate::config::TrafficControllerConfig;
use crate::executor::CommandInvocation;
use eyre::Result;
use std::path::Path;
use std::time::Duration;

/// Sweeps the traffic controller on its own. Only the message type matters to it, so each message type is
/// run once per HEC case, which keeps its results lined up with the nozzle's.
pub struct TrafficControllerTarget {
    config: TrafficControllerConfig,
}

impl TrafficControllerTarget {
    /// Constructs a new [TrafficControllerTarget].
    pub fn new(config: TrafficControllerConfig) -> TrafficControllerTarget {
        TrafficControllerTarget { config }
    }
}

impl SweepTarget for TrafficControllerTarget {
    fn run_target(&self) -> RunTarget {
        RunTarget::TrafficController
    }

    fn binary(&self) -> &Path {
        &self.config.binary
    }

    fn invocation(&self, case: &SweepCase, duration: Duration) -> Result<CommandInvocation> {
        let mut args = vec![
            path_arg(&self.config.binary),
            "--config".into(),
            path_arg(&self.config.config_file),
            "--disableAccessControl".into(),
            "--duration".into(),
            duration.as_secs().to_string(),
            "--message-type".into(),
            case.message_type.to_string(),
        ];
        if let Some(ip) = &self.config.ip {
            args.push("--ip".into());
            args.push(ip.clone());
        }

        CommandInvocation::new(args, duration)
    }

    /// The traffic controller holds on to its listening ports for a bit after exiting.
    fn pause_after_case(&self) -> Duration {
        self.config.pause
    }
}
