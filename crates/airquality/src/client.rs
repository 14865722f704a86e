use crate::credentials::{Authenticator, Credentials};
use crate::error::{Error, Result};
use crate::models::{ErrorEnvelope, JobReference, QueryRequest, QueryResponse, QueryResult};
use crate::query::BoundQuery;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_MAX_RESULTS: u32 = 10_000;
const DEFAULT_MAX_RETRIES: usize = 3;
const MAX_POLLS: usize = 120;
const QUOTA_PROJECT_HEADER: &str = "x-goog-user-project";

/// Source of query results. The collector only sees this trait, so the
/// caller decides which client to hand it.
#[async_trait]
pub trait DatasetClient: Send + Sync {
    /// Run one query to completion and return every row
    async fn run_query(&self, query: &BoundQuery) -> Result<QueryResult>;

    /// Cheap round trip proving credentials and project are usable
    async fn check_access(&self) -> Result<()>;
}

/// Knobs for [`BigQueryClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: String,
    pub timeout: Duration,
    pub max_results: u32,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            max_results: DEFAULT_MAX_RESULTS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// BigQuery REST client (`jobs.query` + `jobs.getQueryResults`)
pub struct BigQueryClient {
    http: reqwest::Client,
    auth: Authenticator,
    project: String,
    options: ClientOptions,
}

impl BigQueryClient {
    /// Create a client billing queries to `project`
    pub fn new(
        project: impl Into<String>,
        credentials: Credentials,
        options: ClientOptions,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        let auth = Authenticator::new(credentials, http.clone());
        Ok(Self {
            http,
            auth,
            project: project.into(),
            options,
        })
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.options.endpoint.trim_end_matches('/'),
            self.project
        )
    }

    fn results_url(&self, job: &JobReference, page_token: Option<&str>) -> Result<String> {
        let base = format!(
            "{}/bigquery/v2/projects/{}/queries/{}",
            self.options.endpoint.trim_end_matches('/'),
            job.project_id,
            job.job_id
        );
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Config(format!("invalid endpoint URL {base}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("maxResults", &self.options.max_results.to_string());
            pairs.append_pair("timeoutMs", &self.timeout_ms().to_string());
            if let Some(location) = &job.location {
                pairs.append_pair("location", location);
            }
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        Ok(url.into())
    }

    fn timeout_ms(&self) -> u64 {
        // Ask the server to answer a little before our HTTP timeout fires.
        let millis = self.options.timeout.as_millis() as u64;
        millis.saturating_sub(millis / 10).max(1)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.options.retry_delay)
            .with_max_times(self.options.max_retries)
    }

    /// Send one request with retries on throttling, server errors and
    /// transport failures
    async fn call<T: DeserializeOwned>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&QueryRequest>,
    ) -> Result<T> {
        (|| async move { self.send_once(method, url, body).await })
            .retry(self.backoff())
            .when(Error::is_retryable)
            .notify(|err: &Error, delay: Duration| {
                let delay_ms = delay.as_millis() as u64;
                warn!(
                    "Retrying BigQuery request in {delay_ms}ms after: {reason}",
                    delay_ms: delay_ms,
                    reason: err.to_string()
                );
            })
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&QueryRequest>,
    ) -> Result<T> {
        let token = self.auth.bearer().await?;
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token.as_declassified());
        if let Some(quota_project) = self.auth.credentials().quota_project() {
            request = request.header(QUOTA_PROJECT_HEADER, quota_project);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // A revoked token must not outlive this response
                self.auth.invalidate().await;
                return Err(Error::Credentials(format!(
                    "the service rejected the access token: {message}"
                )));
            }
            return Err(Error::Query {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Decode(format!("cannot parse response from {url}: {e}")))
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = self.results_url(job, page_token)?;
        self.call(&Method::GET, &url, None).await
    }
}

#[async_trait]
impl DatasetClient for BigQueryClient {
    async fn run_query(&self, query: &BoundQuery) -> Result<QueryResult> {
        let pollutant = &query.pollutant;
        let sql = &query.sql;
        debug!("Issuing query for {pollutant}: {sql}", pollutant: pollutant, sql: sql);

        let request = QueryRequest {
            query: query.sql.clone(),
            use_legacy_sql: false,
            timeout_ms: self.timeout_ms(),
            max_results: self.options.max_results,
        };
        let mut page: QueryResponse = self
            .call(&Method::POST, &self.queries_url(), Some(&request))
            .await?;
        let job = page
            .job_reference
            .clone()
            .ok_or_else(|| Error::Decode("query response has no jobReference".into()))?;

        let mut result = QueryResult::default();
        let mut pages = 0usize;
        let mut polls = 0usize;

        loop {
            if !page.job_complete {
                polls += 1;
                if polls > MAX_POLLS {
                    return Err(Error::Query {
                        status: 408,
                        message: format!("job {} did not complete after {MAX_POLLS} polls", job.job_id),
                    });
                }
                let job_id = &job.job_id;
                debug!("Job {job_id} still running, polling", job_id: job_id);
                page = self.fetch_results(&job, None).await?;
                continue;
            }

            let next = page.page_token.clone();
            result.extend_from_page(page);
            pages += 1;

            match next {
                Some(token) => {
                    debug!(
                        "Fetching page {pages} for {pollutant}",
                        pages: pages,
                        pollutant: pollutant
                    );
                    page = self.fetch_results(&job, Some(&token)).await?;
                }
                None => break,
            }
        }

        let rows = result.num_rows();
        info!(
            "Query for {pollutant} returned {rows} rows in {pages} pages",
            pollutant: pollutant,
            rows: rows,
            pages: pages
        );
        Ok(result)
    }

    async fn check_access(&self) -> Result<()> {
        let kind = self.auth.credentials().kind();
        let project = &self.project;
        info!(
            "Checking BigQuery access for project {project} using {kind} credentials",
            project: project,
            kind: kind
        );
        let probe = BoundQuery {
            pollutant: "probe".to_string(),
            sql: "SELECT 1".to_string(),
        };
        let result = self.run_query(&probe).await?;
        if result.num_rows() != 1 {
            return Err(Error::Decode(format!(
                "access probe returned {} rows, expected 1",
                result.num_rows()
            )));
        }
        Ok(())
    }
}
