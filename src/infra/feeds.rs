//! JSON movie feeds fetched over HTTP.
//!
//! A feed exposes `GET {base}/movies?limit=N` and `GET {base}/search?q=...`,
//! each answering with either a bare array of movie records or an object
//! with a `movies` array.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::debug;
use url::Url;

use crate::application::sources::{MovieSource, RetryPolicy, SourceError};
use crate::config::{FeedSettings, SourcesSettings};
use crate::domain::movies::MovieRecord;

use super::error::InfraError;

const SOURCE: &str = "infra::feeds";
const USER_AGENT: &str = concat!("watchlazy/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedPayload {
    List(Vec<MovieRecord>),
    Wrapped { movies: Vec<MovieRecord> },
}

impl FeedPayload {
    fn into_movies(self) -> Vec<MovieRecord> {
        match self {
            FeedPayload::List(movies) | FeedPayload::Wrapped { movies } => movies,
        }
    }
}

pub struct HttpFeedSource {
    name: String,
    base_url: Url,
    client: reqwest::Client,
    retry: RetryPolicy,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFeedSource {
    pub fn new(
        feed: &FeedSettings,
        timeout: Duration,
        retry: RetryPolicy,
        min_interval: Duration,
    ) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            name: feed.name.clone(),
            base_url: feed.base_url.clone(),
            client,
            retry,
            min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Build one source per configured feed.
    pub fn from_settings(
        settings: &SourcesSettings,
    ) -> Result<Vec<Arc<dyn MovieSource>>, InfraError> {
        let retry = RetryPolicy {
            max_attempts: settings.max_retries.get(),
            base_delay: settings.backoff_base,
            max_delay: MAX_BACKOFF,
        };

        settings
            .feeds
            .iter()
            .map(|feed| {
                Self::new(feed, settings.timeout, retry.clone(), settings.min_interval)
                    .map(|source| Arc::new(source) as Arc<dyn MovieSource>)
            })
            .collect()
    }

    fn endpoint(&self, path: &str, query: (&str, &str)) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Transport(format!("`{}` cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .push(path);
        url.query_pairs_mut().append_pair(query.0, query.1);
        Ok(url)
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_movies(&self, url: &Url) -> Result<Vec<MovieRecord>, SourceError> {
        self.throttle().await;
        debug!(target = SOURCE, source = %self.name, url = %url, "Requesting feed");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }

        let payload: FeedPayload = response.json().await.map_err(classify)?;
        Ok(payload.into_movies())
    }

    fn finish(&self, url: &Url, movies: Vec<MovieRecord>) -> Vec<MovieRecord> {
        movies
            .into_iter()
            .map(|mut movie| {
                movie.normalize_slug();
                if movie.source_urls.is_empty() {
                    movie.source_urls.push(url.to_string());
                }
                movie
            })
            .collect()
    }
}

fn classify(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else if err.is_decode() {
        SourceError::Decode(err.to_string())
    } else if let Some(status) = err.status() {
        SourceError::Status {
            status: status.as_u16(),
        }
    } else {
        SourceError::Transport(err.to_string())
    }
}

#[async_trait]
impl MovieSource for HttpFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<MovieRecord>, SourceError> {
        let url = self.endpoint("movies", ("limit", &limit.to_string()))?;
        let mut movies = self.retry.run(&self.name, || self.get_movies(&url)).await?;
        movies.truncate(limit);
        Ok(self.finish(&url, movies))
    }

    async fn search(&self, query: &str) -> Result<Vec<MovieRecord>, SourceError> {
        let url = self.endpoint("search", ("q", query.trim()))?;
        let movies = self.retry.run(&self.name, || self.get_movies(&url)).await?;
        Ok(self.finish(&url, movies))
    }
}
