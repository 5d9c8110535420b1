use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    fn from_flag(retry: bool) -> Self {
        if retry {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }
}

/// Gateway throttling (429) and 5xx are worth another try; other statuses are final.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    RetryDisposition::from_flag(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    RetryDisposition::from_flag(err.is_connect() || err.is_timeout() || err.is_request())
}

/// Exponential delay schedule, capped at `max_delay`. Also paces mail retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Pause before the next try, or `None` once the failure is final.
    pub fn next_delay(&self, disposition: RetryDisposition, attempt: usize) -> Option<Duration> {
        (disposition == RetryDisposition::Retryable && attempt < self.max_retries)
            .then(|| self.delay_for_attempt(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_feed_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(15),
            user_agent: None,
            global_concurrency: 4,
            per_feed_concurrency: 1,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Shared HTTP client for feed requests: bounded in-flight requests overall and
/// per feed, optional retries on throttling and transport failures.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    feed_gate_size: usize,
    feed_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

/// Successful response; `final_url` is the URL after redirects.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shutting down")]
    Closed,
}

type Failure = (FetchError, RetryDisposition);

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building feed http client")?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            feed_gate_size: config.per_feed_concurrency.max(1),
            feed_gates: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn feed_gate(&self, feed_key: &str) -> Arc<Semaphore> {
        self.feed_gates
            .lock()
            .await
            .entry(feed_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.feed_gate_size)))
            .clone()
    }

    /// GET `url` with `query` appended and return the decoded body.
    ///
    /// Requests sharing a `feed_key` are serialized up to the per-feed limit.
    pub async fn fetch_text(
        &self,
        run_id: Uuid,
        feed_key: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let _slot = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let gate = self.feed_gate(feed_key).await;
        let _feed_slot = gate.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", %run_id, feed_key);
        self.fetch_with_retries(url, query).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let (err, disposition) = match self.send_once(url, query).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            let Some(delay) = self.backoff.next_delay(disposition, attempt) else {
                return Err(err);
            };
            warn!(attempt = attempt + 1, error = %err, ?delay, "retrying feed request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once(&self, url: &str, query: &[(&str, String)]) -> Result<FetchedResponse, Failure> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| {
                let disposition = classify_reqwest_error(&err);
                (FetchError::Request(err), disposition)
            })?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            let err = FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            };
            return Err((err, classify_status(status)));
        }

        let body = resp
            .text()
            .await
            .map_err(|err| (FetchError::Request(err), RetryDisposition::NonRetryable))?;
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1500));
    }

    #[test]
    fn retries_stop_at_the_configured_bound() {
        let policy = BackoffPolicy {
            max_retries: 2,
            ..BackoffPolicy::default()
        };
        assert_eq!(
            policy.next_delay(RetryDisposition::Retryable, 0),
            Some(Duration::from_millis(500))
        );
        assert!(policy.next_delay(RetryDisposition::Retryable, 2).is_none());
        assert!(policy.next_delay(RetryDisposition::NonRetryable, 0).is_none());
        assert!(BackoffPolicy::default()
            .next_delay(RetryDisposition::Retryable, 0)
            .is_none());
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn default_config_uses_feed_timeouts() {
        let config = HttpClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.backoff.max_retries, 0);
        assert!(HttpFetcher::new(config).is_ok());
    }
}
