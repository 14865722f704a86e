pub mod client;
pub mod collector;
pub mod combine;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod query;
pub mod table;

// Re-export key types for use in tests and external applications
pub use crate::client::{BigQueryClient, ClientOptions, DatasetClient};
pub use crate::collector::{Collection, Collector, PollutantReport};
pub use crate::combine::{CombineMode, combine};
pub use crate::config::{
    AirQualityConfig, EmptyPolicy, create_example_config, load_config, validate_config,
};
pub use crate::credentials::{CredentialSource, Credentials};
pub use crate::error::{Error, Result};
pub use crate::query::{BoundQuery, QueryTemplate, YearRange};
pub use crate::table::PollutantTable;

use diagnostics::*;
use std::sync::Arc;

/// Resolve credentials for `config` and build a BigQuery client
pub fn connect(config: &AirQualityConfig) -> Result<BigQueryClient> {
    let (source, credentials) = credentials::resolve(config.credentials.as_deref())?;
    let kind = credentials.kind();
    info!("Using {kind} credentials from {source}", kind: kind, source: source.to_string());
    BigQueryClient::new(config.project.clone(), credentials, config.client_options())
}

/// Connect with ambient credentials and run a full collection
pub async fn collect(config: AirQualityConfig) -> Result<Collection> {
    let client = Arc::new(connect(&config)?);
    Collector::new(config, client)?.collect().await
}
