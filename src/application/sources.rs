//! External movie data producers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::movies::MovieRecord;

const SOURCE: &str = "application::sources";
const METRIC_SOURCE_RETRY_TOTAL: &str = "watchlazy_source_retry_total";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("source responded with status {status}")]
    Status { status: u16 },
    #[error("failed to decode source payload: {0}")]
    Decode(String),
    #[error("source request timed out")]
    Timeout,
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<SourceError> },
}

impl SourceError {
    /// Transport failures, timeouts, throttling and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::Decode(_) | Self::Exhausted { .. } => false,
        }
    }
}

/// A producer of movie records. Every call is fallible and may return partial data.
#[async_trait]
pub trait MovieSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, limit: usize) -> Result<Vec<MovieRecord>, SourceError>;

    async fn search(&self, query: &str) -> Result<Vec<MovieRecord>, SourceError>;
}

/// Bounded retry with exponential backoff: `base_delay * 2^attempt`, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub async fn run<F, Fut, T>(&self, source: &str, mut operation: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            target = SOURCE,
                            source,
                            attempt = attempt + 1,
                            "Source request recovered"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt + 1 >= attempts => {
                    warn!(
                        target = SOURCE,
                        source,
                        attempts,
                        error = %err,
                        "Source request failed, giving up"
                    );
                    return Err(SourceError::Exhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    counter!(METRIC_SOURCE_RETRY_TOTAL, "source" => source.to_string())
                        .increment(1);
                    warn!(
                        target = SOURCE,
                        source,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Source request failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
