//! Application configuration.
//!
//! All configuration is read from the environment exactly once, at the process boundary, and then passed
//! around as an immutable [AppConfig]. Nothing else in the crate reads environment variables.

use crate::errors::AppError;
use crate::executor::RetryPolicy;
use crate::util::serde_duration_millis;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Represents the application's configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    /// How the nozzle binary is invoked, and what it connects to.
    pub nozzle: NozzleConfig,

    /// How the traffic controller binary is invoked.
    pub traffic_controller: TrafficControllerConfig,

    /// The retry policy applied to every sweep case.
    pub retry: RetryPolicy,

    /// Where and how to run Splunk searches.
    pub splunk: SplunkSearchConfig,
}

/// Configures the nozzle under test.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NozzleConfig {
    /// The nozzle executable to run.
    pub binary: PathBuf,

    /// The platform API endpoint the nozzle authenticates against.
    pub api_endpoint: String,

    /// The platform user.
    pub user: String,

    /// The platform user's password. Never serialized.
    #[serde(skip_serializing, default)]
    pub password: String,

    /// The Splunk HEC endpoint the nozzle forwards to.
    pub splunk_host: String,

    /// The Splunk HEC token. Never serialized.
    #[serde(skip_serializing, default)]
    pub splunk_token: String,

    /// The Splunk index events land in.
    pub splunk_index: String,

    /// The UAA client ID, for nozzles launched from an `env.sh` file.
    pub client_id: Option<String>,

    /// The UAA client secret. Never serialized.
    #[serde(skip_serializing, default)]
    pub client_secret: Option<String>,
}

/// Configures the loggregator traffic controller, which is swept to provide a baseline for the nozzle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrafficControllerConfig {
    /// The traffic controller executable to run.
    pub binary: PathBuf,

    /// The traffic controller's JSON config file.
    pub config_file: PathBuf,

    /// The IP to bind to, if any.
    pub ip: Option<String>,

    /// How long to wait after each case, to let the previous run release its resources.
    #[serde(with = "serde_duration_millis")]
    pub pause: Duration,
}

/// Configures the Splunk search client.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SplunkSearchConfig {
    /// The Splunk management (REST) URL, e.g. `https://localhost:8089`.
    pub url: Url,

    /// The Splunk user.
    pub user: String,

    /// The Splunk user's password. Never serialized.
    #[serde(skip_serializing, default)]
    pub password: String,

    /// The index that event searches should target.
    pub index: String,

    /// The metrics index, if metric searches are to be run.
    pub metric_index: Option<String>,

    /// How many times to retry requests that fail with HTTP 500, 502, or 504.
    pub max_retries: u32,

    /// The backoff factor for retries: the `n`th retry waits `backoff_factor * 2^(n-1)` seconds.
    pub backoff_factor: f64,

    /// Whether to accept invalid TLS certificates, which test instances of Splunk nearly always have.
    pub skip_ssl_validation: bool,

    /// How long to wait between search job status polls.
    #[serde(with = "serde_duration_millis")]
    pub poll_interval: Duration,

    /// How many times to poll a search job's status before giving up on it.
    pub max_polls: u32,
}

impl AppConfig {
    /// Builds the [AppConfig] from the process environment.
    pub fn new() -> Result<AppConfig> {
        // If present, load environment variables from a `.env` file in the working directory.
        dotenv::dotenv().ok();

        AppConfig::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the [AppConfig] from the specified lookup function, which should return the value of the
    /// named variable, if it is set.
    ///
    /// Parameters:
    /// * `lookup`: the variable lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let nozzle = NozzleConfig {
            binary: vars.string("NOZZLE_BINARY", "./splunk-firehose-nozzle").into(),
            api_endpoint: vars.string("API_ENDPOINT", "http://ghost:9911"),
            user: vars.string("API_USER", "admin"),
            password: vars.string("API_PASSWORD", "admin"),
            splunk_host: vars.string("SPLUNK_HOST", "https://localhost:8088"),
            splunk_token: vars.string("SPLUNK_TOKEN", "1CB57F19-DC23-419A-8EDA-BA545DD3674D"),
            splunk_index: vars.string("SPLUNK_INDEX", "main"),
            client_id: vars.optional("CLIENT_ID"),
            client_secret: vars.optional("CLIENT_SECRET"),
        };

        let traffic_controller = TrafficControllerConfig {
            binary: vars
                .string("TRAFFIC_CONTROLLER_BINARY", "./trafficcontroller")
                .into(),
            config_file: vars
                .string(
                    "TRAFFIC_CONTROLLER_CONFIG",
                    "loggregator_trafficcontroller.json",
                )
                .into(),
            ip: vars.optional("TRAFFIC_CONTROLLER_IP"),
            pause: Duration::from_millis(vars.parsed("TRAFFIC_CONTROLLER_PAUSE_MS", 10_000u64)?),
        };

        let min_duration_ratio: f64 = vars.parsed("NOZZLE_PERF_MIN_DURATION_RATIO", 0.8)?;
        if !(min_duration_ratio > 0.0 && min_duration_ratio <= 1.0) {
            return Err(AppError::InvalidConfig {
                key: "NOZZLE_PERF_MIN_DURATION_RATIO",
                value: min_duration_ratio.to_string(),
                reason: "must be greater than 0 and at most 1".into(),
            }
            .into());
        }
        let max_attempts: u32 = vars.parsed("NOZZLE_PERF_MAX_ATTEMPTS", 20)?;
        if max_attempts == 0 {
            return Err(AppError::InvalidConfig {
                key: "NOZZLE_PERF_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        let retry = RetryPolicy {
            min_duration_ratio,
            short_run_delay: Duration::from_millis(
                vars.parsed("NOZZLE_PERF_SHORT_RUN_DELAY_MS", 1_000u64)?,
            ),
            max_attempts: Some(max_attempts),
            max_elapsed: vars
                .parsed_optional::<u64>("NOZZLE_PERF_MAX_ELAPSED_SECS")?
                .map(Duration::from_secs),
        };

        let splunk = SplunkSearchConfig {
            url: vars.parsed("SPLUNK_URL", Url::parse("https://localhost:8089")?)?,
            user: vars.string("SPLUNK_USER", "admin"),
            password: vars.string("SPLUNK_PASSWORD", "changeme"),
            index: nozzle.splunk_index.clone(),
            metric_index: vars.optional("SPLUNK_METRIC_INDEX"),
            max_retries: vars.parsed("SPLUNK_MAX_RETRIES", 3)?,
            backoff_factor: 0.1,
            skip_ssl_validation: vars.parsed("SPLUNK_SKIP_SSL_VALIDATION", true)?,
            poll_interval: Duration::from_millis(vars.parsed("SPLUNK_POLL_INTERVAL_MS", 1_000u64)?),
            max_polls: vars.parsed("SPLUNK_MAX_POLLS", 500)?,
        };

        Ok(AppConfig {
            nozzle,
            traffic_controller,
            retry,
            splunk,
        })
    }
}

/// Wraps a variable lookup function with typed accessors. Blank values are treated as unset.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_owned())
    }

    fn parsed_optional<T>(&self, key: &'static str) -> Result<Option<T>, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .map_err(|err| AppError::InvalidConfig {
                        key,
                        value: value.clone(),
                        reason: err.to_string(),
                    })
            })
            .transpose()
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parsed_optional(key)?.unwrap_or(default))
    }
}
