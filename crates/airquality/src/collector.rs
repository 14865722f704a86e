use crate::client::DatasetClient;
use crate::combine::{CombineMode, combine};
use crate::config::{AirQualityConfig, EmptyPolicy, validate_config};
use crate::error::{Error, Result};
use crate::query::{BoundQuery, QueryTemplate};
use crate::table::PollutantTable;
use arrow_array::RecordBatch;
use diagnostics::*;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;

/// Per-pollutant outcome of a collection run
#[derive(Debug, Clone)]
pub struct PollutantReport {
    pub pollutant: String,
    pub sql: String,
    pub rows: usize,
}

/// Result of a collection run
#[derive(Debug, Clone)]
pub struct Collection {
    pub mode: CombineMode,
    pub table: RecordBatch,
    pub reports: Vec<PollutantReport>,
    pub tables: Vec<PollutantTable>,
}

impl Collection {
    #[must_use]
    pub fn total_source_rows(&self) -> usize {
        self.reports.iter().map(|r| r.rows).sum()
    }
}

/// Runs one query per configured pollutant and combines the results
pub struct Collector {
    config: AirQualityConfig,
    template: QueryTemplate,
    client: Arc<dyn DatasetClient>,
}

impl Collector {
    pub fn new(config: AirQualityConfig, client: Arc<dyn DatasetClient>) -> Result<Self> {
        validate_config(&config)?;
        let template = config.template()?;
        Ok(Self {
            config,
            template,
            client,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AirQualityConfig {
        &self.config
    }

    /// The queries a collection run would issue, in configured order
    pub fn bound_queries(&self) -> Result<Vec<BoundQuery>> {
        self.config
            .pollutants
            .iter()
            .map(|p| self.template.bind(p))
            .collect()
    }

    async fn fetch(&self, query: BoundQuery) -> Result<(PollutantTable, PollutantReport)> {
        let pollutant = query.pollutant.clone();
        info!("Querying hourly summary for {pollutant}", pollutant: pollutant);

        let result = self.client.run_query(&query).await?;
        let table = PollutantTable::from_result(&query.pollutant, &result)?;

        let rows = table.num_rows();
        if rows == 0 {
            match self.config.on_empty {
                EmptyPolicy::Error => return Err(Error::EmptyResult { pollutant }),
                EmptyPolicy::Pad => {
                    warn!(
                        "Query for {pollutant} returned no rows; its columns will be null",
                        pollutant: pollutant
                    );
                }
            }
        }

        let report = PollutantReport {
            pollutant: query.pollutant,
            sql: query.sql,
            rows,
        };
        Ok((table, report))
    }

    /// Issue every query and combine the tables
    pub async fn collect(&self) -> Result<Collection> {
        let queries = self.bound_queries()?;
        let query_count = queries.len();
        let mode = self.config.combine;

        let fetched: Vec<(PollutantTable, PollutantReport)> = if self.config.parallel {
            let concurrency = self.config.concurrency.clamp(1, query_count.max(1));
            info!(
                "Starting collection of {query_count} pollutants, {concurrency} at a time",
                query_count: query_count,
                concurrency: concurrency
            );
            stream::iter(queries.into_iter().map(|q| self.fetch(q)))
                .buffered(concurrency)
                .try_collect()
                .await?
        } else {
            info!("Starting collection of {query_count} pollutants", query_count: query_count);
            let mut fetched = Vec::with_capacity(query_count);
            for query in queries {
                fetched.push(self.fetch(query).await?);
            }
            fetched
        };

        let (tables, reports): (Vec<_>, Vec<_>) = fetched.into_iter().unzip();

        if tables.iter().all(PollutantTable::is_empty) {
            let pollutant = self.config.pollutants.join(", ");
            return Err(Error::EmptyResult { pollutant });
        }

        let table = combine(&tables, mode)?;
        info!("Collection completed");

        Ok(Collection {
            mode,
            table,
            reports,
            tables,
        })
    }
}
