//! Storage contract, Postgres/in-memory stores, and HTTP fetch utilities.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cutoff_core::{MajorId, MajorRecord, NewRunMetadata, RunMetadata};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, Instrument};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::{MemoryStore, StoredMajor, StoredStatistic};
pub use postgres::PgAdmissionStore;

pub const CRATE_NAME: &str = "cutoff-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store (or the enclosing transaction) cannot be used at all.
    #[error("storage unreachable: {0}")]
    Connectivity(String),
    /// A single row was refused; the transaction is still usable.
    #[error("upsert rejected for {record}: {reason}")]
    Conflict { record: String, reason: String },
    #[error("migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn is_row_level(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Durable home of majors, admission statistics, and the run audit log.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Most recent audit row by timestamp, if any run was ever recorded.
    async fn latest_run(&self) -> Result<Option<RunMetadata>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;
}

/// One write transaction. Dropping it without `commit` discards everything.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Upsert the major on (name, program type), then its statistic on
    /// (major, year, domestic). Row-level failures leave the transaction usable.
    async fn upsert_record(&mut self, record: &MajorRecord) -> Result<MajorId, StoreError>;

    /// Revert every `upsert_record` made in this transaction.
    async fn discard_record_changes(&mut self) -> Result<(), StoreError>;

    async fn append_run_metadata(&mut self, entry: &NewRunMetadata) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// `None` once the failure is permanent or the retry budget is spent.
    pub fn retry_delay(&self, attempt_index: usize, disposition: RetryDisposition) -> Option<Duration> {
        (disposition == RetryDisposition::Retryable && attempt_index < self.max_retries)
            .then(|| self.delay_for_attempt(attempt_index))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err),
            FetchError::HttpStatus { status, .. } => classify_status(*status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let span = tracing::info_span!("http_fetch", %run_id, source, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let err = match self.fetch_once(url).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            let Some(delay) = self.backoff.retry_delay(attempt, err.disposition()) else {
                return Err(err);
            };
            debug!(error = %err, attempt, ?delay, "retrying document fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status,
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
