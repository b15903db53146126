//! A small client for Splunk's REST search API, used to check that the events a nozzle forwarded actually
//! arrived.
//!
//! Searches are run as jobs: the job is created, its status is polled until it is `DONE`, and then its
//! events (or, for transforming and generating searches, its results) are fetched.

use crate::config::SplunkSearchConfig;
use crate::errors::AppError;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// The HTTP statuses that Splunk returns while it's overloaded or restarting, which are worth retrying.
static RETRY_STATUSES: &[u16] = &[500, 502, 504];

/// The dispatch state of a search job that has finished successfully.
static DISPATCH_STATE_DONE: &str = "DONE";

/// The dispatch state of a search job that has failed.
static DISPATCH_STATE_FAILED: &str = "FAILED";

/// The time range that a search covers, in Splunk's time modifier syntax (e.g. `-30m@h`, `now`).
#[derive(Clone, Debug, PartialEq)]
pub struct SearchWindow {
    pub earliest_time: String,
    pub latest_time: String,
}

impl SearchWindow {
    /// Constructs a new [SearchWindow].
    pub fn new(earliest_time: &str, latest_time: &str) -> SearchWindow {
        SearchWindow {
            earliest_time: earliest_time.to_owned(),
            latest_time: latest_time.to_owned(),
        }
    }
}

impl Default for SearchWindow {
    /// The last half hour or so, snapped to the start of the hour.
    fn default() -> Self {
        SearchWindow::new("-30m@h", "now")
    }
}

/// Enumerates the outputs that can be fetched from a finished search job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SearchOutput {
    /// The raw events that the search matched.
    Events,

    /// The transformed results, e.g. from `stats` or `mstats`.
    Results,
}

impl SearchOutput {
    fn path_segment(&self) -> &'static str {
        match self {
            SearchOutput::Events => "events",
            SearchOutput::Results => "results",
        }
    }
}

/// The response to a search job creation request.
#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    sid: String,
}

/// The response to a search job status request. Only the fields needed here are modeled.
#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    entry: Vec<JobStatusEntry>,
}

#[derive(Debug, Deserialize)]
struct JobStatusEntry {
    content: JobStatusContent,
}

#[derive(Debug, Deserialize)]
struct JobStatusContent {
    #[serde(rename = "dispatchState")]
    dispatch_state: String,
}

/// The response to a search job events/results request.
#[derive(Debug, Deserialize)]
struct JobOutputResponse {
    results: Vec<Value>,
}

/// Runs searches against Splunk's REST API.
pub struct SplunkApi {
    config: SplunkSearchConfig,
    client: reqwest::Client,
}

impl SplunkApi {
    /// Constructs a new [SplunkApi].
    ///
    /// Parameters:
    /// * `config`: the [SplunkSearchConfig] detailing where Splunk is and how to talk to it
    pub fn new(config: SplunkSearchConfig) -> Result<SplunkApi> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.skip_ssl_validation)
            .build()
            .context("Unable to build the Splunk HTTP client.")?;

        Ok(SplunkApi { config, client })
    }

    /// Returns the [SplunkSearchConfig] that this client was built with.
    pub fn config(&self) -> &SplunkSearchConfig {
        &self.config
    }

    /// Turns a bare query into a complete SPL search, by prefixing it with the `search` command. Queries
    /// that start with a generating command (e.g. `| mstats ...`) are returned as-is.
    pub fn compose_search_query(query: &str) -> String {
        let query = query.trim_start();
        if query.starts_with('|') {
            query.to_owned()
        } else {
            format!("search {}", query)
        }
    }

    /// Runs the specified query and returns the events it matched.
    ///
    /// Parameters:
    /// * `query`: the query to run, which will be passed through [SplunkApi::compose_search_query]
    /// * `start_time`: the earliest time to search from, e.g. `-30m@h`
    /// * `end_time`: the latest time to search to, e.g. `now`
    pub async fn check_events_from_splunk(
        &self,
        query: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<Vec<Value>> {
        let query = SplunkApi::compose_search_query(query);
        self.search(
            &query,
            &SearchWindow::new(start_time, end_time),
            SearchOutput::Events,
        )
        .await
    }

    /// Runs the specified SPL search as a job, waits for it to finish, and returns its output.
    ///
    /// Parameters:
    /// * `search`: the complete SPL search to run
    /// * `window`: the [SearchWindow] to search within
    /// * `output`: which [SearchOutput] to fetch once the job is done
    ///
    /// Returns the job's output records, or an error if the job could not be run, failed, or did not finish
    /// in time.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn search(
        &self,
        search: &str,
        window: &SearchWindow,
        output: SearchOutput,
    ) -> Result<Vec<Value>> {
        let sid = self.create_job(search, window).await?;
        self.wait_for_job(&sid).await?;
        self.job_output(&sid, output).await
    }

    /// Creates a search job, returning its ID.
    async fn create_job(&self, search: &str, window: &SearchWindow) -> Result<String> {
        let url = self.endpoint("services/search/jobs")?;
        info!("requesting: {}", url);
        let form = [
            ("search", search),
            ("earliest_time", window.earliest_time.as_str()),
            ("latest_time", window.latest_time.as_str()),
        ];
        let response = self
            .send(&url, || self.client.post(url.clone()).form(&form))
            .await?;

        let created: CreateJobResponse = response
            .json()
            .await
            .with_context(|| format!("Unable to parse the search job created by '{}'.", url))?;
        debug!(sid = created.sid.as_str(), "search job created");
        Ok(created.sid)
    }

    /// Polls the specified search job until it is done.
    async fn wait_for_job(&self, sid: &str) -> Result<()> {
        let url = self.endpoint(&format!("services/search/jobs/{}", sid))?;
        info!("requesting: {}", url);

        for _ in 0..self.config.max_polls {
            let response = self.send(&url, || self.client.get(url.clone())).await?;
            let status: JobStatusResponse = response
                .json()
                .await
                .with_context(|| format!("Unable to parse the search job status from '{}'.", url))?;
            let dispatch_state = status
                .entry
                .first()
                .map(|entry| entry.content.dispatch_state.as_str())
                .ok_or_else(|| eyre!("The search job status from '{}' had no entries.", url))?;
            debug!(sid, dispatch_state, "polled search job");

            if dispatch_state == DISPATCH_STATE_DONE {
                return Ok(());
            }
            if dispatch_state == DISPATCH_STATE_FAILED {
                return Err(AppError::SearchJobFailed(sid.to_owned()).into());
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(AppError::SearchJobTimeout {
            sid: sid.to_owned(),
            polls: self.config.max_polls,
        }
        .into())
    }

    /// Fetches the specified output of a finished search job.
    async fn job_output(&self, sid: &str, output: SearchOutput) -> Result<Vec<Value>> {
        let url = self.endpoint(&format!(
            "services/search/jobs/{}/{}",
            sid,
            output.path_segment()
        ))?;
        let response = self.send(&url, || self.client.get(url.clone())).await?;

        let output: JobOutputResponse = response
            .json()
            .await
            .with_context(|| format!("Unable to parse the search job output from '{}'.", url))?;
        Ok(output.results)
    }

    /// Returns the full URL for the specified REST API path, asking for JSON output. The path is appended
    /// to any path already in the configured URL, with or without its trailing slash.
    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.config.url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                eyre!(
                    "Unable to build a Splunk URL for '{}' from '{}'.",
                    path,
                    self.config.url
                )
            })?
            .pop_if_empty()
            .extend(path.split('/'));
        url.query_pairs_mut().append_pair("output_mode", "json");
        Ok(url)
    }

    /// Sends the request built by `build`, with credentials, retrying transient failures.
    ///
    /// Parameters:
    /// * `url`: the URL being requested, for error reporting
    /// * `build`: builds the request; called once per attempt
    ///
    /// Returns the successful response, or an error for any other outcome once retries are used up.
    async fn send<F>(&self, url: &Url, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut retries: u32 = 0;
        loop {
            let result = build()
                .basic_auth(&self.config.user, Some(&self.config.password))
                .send()
                .await;
            let retryable = match &result {
                Ok(response) => RETRY_STATUSES.contains(&response.status().as_u16()),
                Err(err) => err.is_connect() || err.is_timeout(),
            };

            if !retryable || retries >= self.config.max_retries {
                let response = result.with_context(|| format!("The request to '{}' failed.", url))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    warn!(url = url.as_str(), status = status.as_u16(), "request failed");
                    return Err(AppError::SplunkRequestFailed {
                        url: url.to_string(),
                        status: status.as_u16(),
                        body,
                    }
                    .into());
                }
                return Ok(response);
            }

            retries += 1;
            let backoff = self.backoff(retries);
            warn!(
                url = url.as_str(),
                retry = retries,
                "transient request failure, retrying in {:?}",
                backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Returns how long to wait before the specified retry (counting from `1`).
    fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.config.backoff_factor * 2f64.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}
