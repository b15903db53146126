//! Contains the [SweepTarget] trait, its implementations, and the table of cases that every target is swept
//! across.

use crate::config::AppConfig;
use crate::executor::CommandInvocation;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod nozzle;
mod traffic_controller;

pub use nozzle::NozzleTarget;
pub use traffic_controller::TrafficControllerTarget;

/// The HEC worker counts that each message type is swept across.
static HEC_WORKERS: &[u32] = &[1, 2, 4, 8, 16, 32];

/// The HEC batch sizes that each message type is swept across. The full set of [HEC_WORKERS] is run for
/// each batch size, in this order.
static HEC_BATCH_SIZES: &[u32] = &[100, 1000];

/// Enumerates the binaries that can be swept. The variant names double as the `--run` values.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum RunTarget {
    /// The Splunk firehose nozzle.
    #[serde(rename = "nozzle")]
    #[value(name = "nozzle")]
    Nozzle,

    /// The loggregator traffic controller, swept on its own to provide a baseline.
    #[serde(rename = "trafficcontroller")]
    #[value(name = "trafficcontroller")]
    TrafficController,
}

impl std::fmt::Display for RunTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunTarget::Nozzle => write!(f, "nozzle"),
            RunTarget::TrafficController => write!(f, "trafficcontroller"),
        }
    }
}

/// Enumerates the synthetic firehose message shapes.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum MessageType {
    #[serde(rename = "s256byte")]
    Structured256Byte,
    #[serde(rename = "s1kbyte")]
    Structured1KByte,
    #[serde(rename = "uns256byte")]
    Unstructured256Byte,
    #[serde(rename = "uns1kbyte")]
    Unstructured1KByte,
}

impl MessageType {
    /// All of the [MessageType]s, in sweep order.
    pub const ALL: [MessageType; 4] = [
        MessageType::Structured256Byte,
        MessageType::Structured1KByte,
        MessageType::Unstructured256Byte,
        MessageType::Unstructured1KByte,
    ];

    /// Returns the name that the binaries (and the Splunk `message_type` field) use for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Structured256Byte => "s256byte",
            MessageType::Structured1KByte => "s1kbyte",
            MessageType::Unstructured256Byte => "uns256byte",
            MessageType::Unstructured1KByte => "uns1kbyte",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The HEC (HTTP Event Collector) tuning that a single sweep case runs the nozzle with.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct HecParams {
    pub hec_workers: u32,
    pub hec_batch_size: u32,
}

/// A single point in the sweep.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SweepCase {
    pub message_type: MessageType,
    pub hec: HecParams,
}

impl SweepCase {
    /// Returns the value for the nozzle's `--extra-fields` flag, which tags every event forwarded during
    /// this case so that the case's events can be found in Splunk afterwards.
    pub fn extra_fields(&self) -> String {
        format!(
            "message_type:{},hec-workers:{},hec-batch-size:{}",
            self.message_type, self.hec.hec_workers, self.hec.hec_batch_size
        )
    }
}

impl std::fmt::Display for SweepCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/workers={}/batch={}",
            self.message_type, self.hec.hec_workers, self.hec.hec_batch_size
        )
    }
}

/// Returns the full sweep table: every [MessageType], crossed with every [HecParams] case. The message
/// type varies slowest, then the batch size, then the worker count.
pub fn sweep_cases() -> Vec<SweepCase> {
    MessageType::ALL
        .iter()
        .flat_map(|message_type| {
            HEC_BATCH_SIZES.iter().flat_map(move |hec_batch_size| {
                HEC_WORKERS.iter().map(move |hec_workers| SweepCase {
                    message_type: *message_type,
                    hec: HecParams {
                        hec_workers: *hec_workers,
                        hec_batch_size: *hec_batch_size,
                    },
                })
            })
        })
        .collect()
}

/// [SweepTarget] implementations each represent a binary that can be swept: they know how to turn each
/// [SweepCase] into a command line for that binary.
///
/// Implementations are required to be [Sync] and [Send], so that a sweep can be handed off to a blocking
/// worker thread.
pub trait SweepTarget: Sync + Send {
    /// Returns the [RunTarget] that this [SweepTarget] implements.
    fn run_target(&self) -> RunTarget;

    /// Returns the path to the binary that this target runs.
    fn binary(&self) -> &Path;

    /// Builds the command to run for the specified case.
    ///
    /// Parameters:
    /// * `case`: the [SweepCase] to build the command for
    /// * `duration`: how long each run is expected to last
    fn invocation(&self, case: &SweepCase, duration: Duration) -> Result<CommandInvocation>;

    /// Returns how long to wait after each case completes, before starting the next one.
    fn pause_after_case(&self) -> Duration {
        Duration::from_secs(0)
    }
}

/// Returns the [SweepTarget] for the specified [RunTarget].
///
/// Parameters:
/// * `run_target`: the binary to sweep
/// * `config`: the application's [AppConfig]
pub fn create_sweep_target(run_target: RunTarget, config: &AppConfig) -> Box<dyn SweepTarget> {
    match run_target {
        RunTarget::Nozzle => Box::new(NozzleTarget::new(config.nozzle.clone())),
        RunTarget::TrafficController => Box::new(TrafficControllerTarget::new(
            config.traffic_controller.clone(),
        )),
    }
}

/// Converts a path into a command line argument.
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
