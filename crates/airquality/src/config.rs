use crate::client::{ClientOptions, DEFAULT_ENDPOINT};
use crate::combine::CombineMode;
use crate::error::{Error, Result};
use crate::query::{QueryTemplate, YearRange, validate_pollutant};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when a pollutant query returns zero rows
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPolicy {
    /// Keep going; the empty side shows up as nulls in the combined table
    #[default]
    Pad,
    /// Fail the collection
    Error,
}

/// Collector configuration, normally read from YAML
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AirQualityConfig {
    /// Project billed for the queries
    pub project: String,
    /// Credential file; see [`crate::credentials`] for the fallback order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PathBuf>,
    #[serde(default = "default_pollutants")]
    pub pollutants: Vec<String>,
    #[serde(default)]
    pub years: YearRange,
    #[serde(default)]
    pub combine: CombineMode,
    #[serde(default)]
    pub on_empty: EmptyPolicy,
    /// Issue the pollutant queries concurrently
    #[serde(default)]
    pub parallel: bool,
    /// Upper bound on queries in flight when `parallel` is set
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Service root, overridable for testing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_pollutants() -> Vec<String> {
    vec!["o3".to_string(), "no2".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_results() -> u32 {
    10_000
}

fn default_max_retries() -> usize {
    3
}

impl AirQualityConfig {
    /// Minimal configuration for `project` with every other field defaulted
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            credentials: None,
            pollutants: default_pollutants(),
            years: YearRange::default(),
            combine: CombineMode::default(),
            on_empty: EmptyPolicy::default(),
            parallel: false,
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_results: default_max_results(),
            max_retries: default_max_retries(),
            endpoint: None,
        }
    }

    /// The query template restricted to the configured years
    pub fn template(&self) -> Result<QueryTemplate> {
        QueryTemplate::default().with_years(self.years.start, self.years.end)
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            endpoint: self
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout: Duration::from_secs(self.timeout_secs),
            max_results: self.max_results,
            max_retries: self.max_retries,
            ..Default::default()
        }
    }
}

/// Load configuration from a YAML file.
///
/// A relative `credentials` path is taken relative to the config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AirQualityConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read config file {}: {e}", path.display()))
    })?;

    let mut config: AirQualityConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

    if let Some(creds) = &config.credentials {
        if creds.is_relative() {
            if let Some(dir) = path.parent() {
                config.credentials = Some(dir.join(creds));
            }
        }
    }

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &AirQualityConfig) -> Result<()> {
    if config.project.trim().is_empty() {
        return Err(Error::Config("project cannot be empty".into()));
    }

    if config.pollutants.is_empty() {
        return Err(Error::Config("At least one pollutant must be configured".into()));
    }

    let mut seen = BTreeSet::new();
    for pollutant in &config.pollutants {
        validate_pollutant(pollutant)?;
        if !seen.insert(pollutant.as_str()) {
            return Err(Error::Config(format!("pollutant '{pollutant}' is listed twice")));
        }
    }

    YearRange::new(config.years.start, config.years.end)?;

    if config.concurrency == 0 {
        return Err(Error::Config("concurrency must be greater than 0".into()));
    }

    if config.timeout_secs == 0 {
        return Err(Error::Config("timeout_secs must be greater than 0".into()));
    }

    if config.max_results == 0 {
        return Err(Error::Config("max_results must be greater than 0".into()));
    }

    Ok(())
}

const EXAMPLE_CONFIG: &str = "\
# Project billed for the queries. The dataset itself is public.
project: my-gcp-project

# Service account key or gcloud credentials file. When omitted, the
# GOOGLE_APPLICATION_CREDENTIALS variable, gcloud's application default
# credentials and AIRQUALITY_ACCESS_TOKEN are tried in that order.
# credentials: /path/to/service-account.json

pollutants: [o3, no2]

years:
  start: 2013
  end: 2017

# join: full outer join on Lat, Lon, Date, Time (one value column per pollutant)
# columns: side-by-side, rows paired by position, padded with nulls
# long: one row per observation and pollutant
combine: join

# pad: an empty pollutant shows up as nulls; error: fail the run
on_empty: pad

# Queries run one after another unless parallel is set; concurrency caps
# how many are in flight at once.
parallel: false
concurrency: 4
timeout_secs: 60
max_results: 10000
max_retries: 3
";

/// Write an example configuration file. Fails if the file already exists.
pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_ref())?;
    file.write_all(EXAMPLE_CONFIG.as_bytes())?;
    Ok(())
}
