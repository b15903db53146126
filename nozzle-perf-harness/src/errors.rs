//! This module contains the application's fatal error types.

use thiserror::Error;

/// Enumerates the application's custom unrecoverable errors. For every unrecoverable error type
/// encountered in the application, an entry should be added to this enum. Note: the
/// [thiserror](https://github.com/dtolnay/thiserror) library is used to derive the error details.
#[derive(Debug, Error)]
pub enum AppError {
    /// Represents an environment variable whose value could not be parsed.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidConfig {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Represents an external binary that the selected sweep target needs, but which is missing.
    #[error("missing pre-req: '{0}' does not exist")]
    MissingPrerequisite(std::path::PathBuf),

    /// Represents a sweep where at least one case never produced a full-length, error-free run.
    #[error("{exhausted} of {total} sweep cases exhausted their retry budget")]
    SweepIncomplete { exhausted: usize, total: usize },

    /// Represents a Splunk REST API call that returned a non-success HTTP status.
    #[error("request to '{url}' failed with status '{status}' and body: '{body}'")]
    SplunkRequestFailed {
        url: String,
        status: u16,
        body: String,
    },

    /// Represents a Splunk search job that reached the `FAILED` dispatch state.
    #[error("search job '{0}' failed")]
    SearchJobFailed(String),

    /// Represents a Splunk search job that did not finish within the configured number of polls.
    #[error("search job '{sid}' did not finish after {polls} polls")]
    SearchJobTimeout { sid: String, polls: u32 },
}
