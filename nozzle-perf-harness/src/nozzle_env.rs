//! Renders the `env.sh` file that the nozzle's launch scripts source its settings from.

use crate::config::NozzleConfig;
use eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing::info;

/// The name of the file written by [NozzleEnvironment::write_to].
pub static ENV_FILE_NAME: &str = "env.sh";

/// An ordered set of environment variables for the nozzle.
#[derive(Clone, Debug, PartialEq)]
pub struct NozzleEnvironment {
    vars: Vec<(String, String)>,
}

impl NozzleEnvironment {
    /// Constructs a new [NozzleEnvironment] with the defaults used for CI runs of the nozzle, pulling the
    /// Splunk and UAA settings from the specified [NozzleConfig]. Unset optional settings are left blank.
    pub fn from_config(config: &NozzleConfig) -> NozzleEnvironment {
        let mut env = NozzleEnvironment { vars: vec![] };
        env.set("ADD_APP_INFO", "true");
        env.set(
            "EVENTS",
            "ValueMetric,CounterEvent,Error,LogMessage,HttpStartStop,ContainerMetric",
        );
        env.set("SPLUNK_TOKEN", &config.splunk_token);
        env.set("SPLUNK_HOST", &config.splunk_host);
        env.set("SPLUNK_INDEX", &config.splunk_index);
        env.set("FIREHOSE_SUBSCRIPTION_ID", "splunk-ci");
        env.set("CLIENT_ID", config.client_id.as_deref().unwrap_or_default());
        env.set(
            "CLIENT_SECRET",
            config.client_secret.as_deref().unwrap_or_default(),
        );
        env.set("ENABLE_EVENT_TRACING", "true");
        env.set("SKIP_SSL_VALIDATION_CF", "true");
        env.set("SKIP_SSL_VALIDATION_SPLUNK", "true");
        env.set("EXTRA_FIELDS", "name:update-ci-test");
        env
    }

    /// Sets the specified variable. An existing variable keeps its position; a new one goes at the end.
    pub fn set(&mut self, key: &str, value: &str) -> &mut NozzleEnvironment {
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.to_owned(),
            None => self.vars.push((key.to_owned(), value.to_owned())),
        }
        self
    }

    /// Returns the value of the specified variable, if it's set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Renders the variables as a bash script that exports each of them.
    pub fn render(&self) -> String {
        let mut script = String::from("#! /bin/bash");
        for (key, value) in &self.vars {
            script.push_str(&format!("\nexport {}={}", key, shell_quote(value)));
        }
        script
    }

    /// Writes the rendered script to `env.sh` in the specified directory, replacing any existing file.
    ///
    /// Parameters:
    /// * `dir`: the directory to write to
    ///
    /// Returns the path of the file written.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(ENV_FILE_NAME);
        std::fs::write(&path, self.render())
            .with_context(|| format!("Unable to write '{}'.", path.display()))?;
        info!("wrote '{}'", path.display());
        Ok(path)
    }
}

/// Single-quotes the specified value for bash, so that it is exported verbatim.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

#[cfg(test)]
mod tests {
    use super::NozzleEnvironment;
    use crate::config::AppConfig;
    use std::collections::HashMap;

    fn environment(vars: &[(&str, &str)]) -> NozzleEnvironment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        NozzleEnvironment::from_config(&config.nozzle)
    }

    /// Verifies the default script.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn render_defaults() {
        let env = environment(&[("CLIENT_ID", "splunk-firehose"), ("CLIENT_SECRET", "s3cret")]);

        assert_eq!(
            "#! /bin/bash\n\
             export ADD_APP_INFO='true'\n\
             export EVENTS='ValueMetric,CounterEvent,Error,LogMessage,HttpStartStop,ContainerMetric'\n\
             export SPLUNK_TOKEN='1CB57F19-DC23-419A-8EDA-BA545DD3674D'\n\
             export SPLUNK_HOST='https://localhost:8088'\n\
             export SPLUNK_INDEX='main'\n\
             export FIREHOSE_SUBSCRIPTION_ID='splunk-ci'\n\
             export CLIENT_ID='splunk-firehose'\n\
             export CLIENT_SECRET='s3cret'\n\
             export ENABLE_EVENT_TRACING='true'\n\
             export SKIP_SSL_VALIDATION_CF='true'\n\
             export SKIP_SSL_VALIDATION_SPLUNK='true'\n\
             export EXTRA_FIELDS='name:update-ci-test'",
            env.render()
        );
    }

    /// Verifies that overrides keep their original position, and new variables are appended.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn overrides_and_additions() {
        let mut env = environment(&[]);
        env.set("EVENTS", "LogMessage")
            .set("HEC_WORKERS", "8")
            .set("EXTRA_FIELDS", "name:perf");

        let rendered = env.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(14, lines.len());
        assert_eq!("export EVENTS='LogMessage'", lines[2]);
        assert_eq!("export EXTRA_FIELDS='name:perf'", lines[12]);
        assert_eq!("export HEC_WORKERS='8'", lines[13]);
        assert_eq!(Some("8"), env.get("HEC_WORKERS"));
        assert_eq!(Some(""), env.get("CLIENT_ID"));
    }

    /// Verifies that values containing quotes survive being sourced.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn quotes_escaped() {
        let mut env = environment(&[]);
        env.set("EXTRA_FIELDS", "name:it's");

        assert!(env
            .render()
            .ends_with(r#"export EXTRA_FIELDS='name:it'\''s'"#));
    }

    /// Verifies that the script is written to `env.sh` in the target directory.
    #[tracing::instrument(level = "info")]
    #[test_log::test]
    fn write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment(&[("SPLUNK_INDEX", "pcfperf")]);

        let path = env.write_to(dir.path()).unwrap();

        assert_eq!(dir.path().join("env.sh"), path);
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(env.render(), written);
        assert!(written.contains("export SPLUNK_INDEX='pcfperf'"));
    }
}
