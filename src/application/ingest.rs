//! Aggregate fetch from every source into the snapshot.

use std::sync::Arc;

use futures::future::join_all;
use metrics::histogram;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::movies::{MovieRecord, deduplicate};
use crate::infra::snapshot::{Snapshot, SnapshotStore};

use super::inflight::{Flight, FlightError, SingleFlight};
use super::sources::MovieSource;

const SOURCE: &str = "application::ingest";
const METRIC_FETCH_MS: &str = "watchlazy_fetch_ms";

/// Result of one aggregate fetch across all sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchCycle {
    #[serde(skip)]
    pub movies: Arc<Vec<MovieRecord>>,
    pub fetched: usize,
    pub failed_sources: Vec<String>,
    /// Whether the snapshot file was replaced.
    pub persisted: bool,
}

pub struct Ingestor {
    sources: Arc<Vec<Arc<dyn MovieSource>>>,
    snapshot: Arc<SnapshotStore>,
    fetch_limit: usize,
    flight: SingleFlight<FetchCycle>,
}

impl Ingestor {
    pub fn new(
        sources: Vec<Arc<dyn MovieSource>>,
        snapshot: Arc<SnapshotStore>,
        fetch_limit: usize,
    ) -> Self {
        Self {
            sources: Arc::new(sources),
            snapshot,
            fetch_limit,
            flight: SingleFlight::new("fetch"),
        }
    }

    pub fn snapshot(&self) -> &Arc<SnapshotStore> {
        &self.snapshot
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    pub fn in_progress(&self) -> bool {
        self.flight.in_progress()
    }

    /// Run a fetch cycle, or join the one already running.
    pub async fn fetch(&self) -> Result<Flight<FetchCycle>, FlightError> {
        let sources = Arc::clone(&self.sources);
        let snapshot = Arc::clone(&self.snapshot);
        let limit = self.fetch_limit;
        self.flight
            .run(move || fetch_cycle(sources, snapshot, limit))
            .await
    }

    /// The snapshot to answer from, refreshing it first when it is empty or
    /// stale. A caller that finds a fetch already running gets the current
    /// snapshot immediately.
    pub async fn snapshot_or_refresh(&self) -> Arc<Snapshot> {
        if !self.snapshot.needs_refresh() {
            return self.snapshot.current();
        }

        let sources = Arc::clone(&self.sources);
        let snapshot = Arc::clone(&self.snapshot);
        let limit = self.fetch_limit;
        match self
            .flight
            .lead(move || fetch_cycle(sources, snapshot, limit))
            .await
        {
            None => info!(
                target = SOURCE,
                "Snapshot refresh already running, serving current snapshot"
            ),
            Some(Err(err)) => warn!(
                target = SOURCE,
                error = %err,
                "Snapshot refresh failed, serving current snapshot"
            ),
            Some(Ok(_)) => {}
        }

        self.snapshot.current()
    }

    /// Live search across every source, deduplicated.
    pub async fn search_sources(&self, query: &str) -> Vec<MovieRecord> {
        let searches = self.sources.iter().map(|source| async move {
            match source.search(query).await {
                Ok(movies) => movies,
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        source = source.name(),
                        error = %err,
                        "Source search failed"
                    );
                    Vec::new()
                }
            }
        });
        let results = join_all(searches).await;
        deduplicate(results.into_iter().flatten().collect())
    }
}

async fn fetch_cycle(
    sources: Arc<Vec<Arc<dyn MovieSource>>>,
    snapshot: Arc<SnapshotStore>,
    limit: usize,
) -> FetchCycle {
    let started = Instant::now();
    let fetches = sources.iter().map(|source| async move {
        let outcome = source.fetch(limit).await;
        (source.name().to_string(), outcome)
    });

    let mut collected = Vec::new();
    let mut failed_sources = Vec::new();
    for (name, outcome) in join_all(fetches).await {
        match outcome {
            Ok(movies) => {
                info!(target = SOURCE, source = %name, movies = movies.len(), "Source fetched");
                collected.extend(movies);
            }
            Err(err) => {
                warn!(target = SOURCE, source = %name, error = %err, "Source fetch failed");
                failed_sources.push(name);
            }
        }
    }

    let movies = deduplicate(collected);
    let persisted = if movies.is_empty() {
        warn!(
            target = SOURCE,
            failed = failed_sources.len(),
            "Fetch produced no movies, keeping previous snapshot"
        );
        false
    } else {
        match snapshot.save(movies.clone()).await {
            Ok(_) => true,
            Err(err) => {
                warn!(target = SOURCE, error = %err, "Failed to persist snapshot");
                false
            }
        }
    };

    histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

    FetchCycle {
        fetched: movies.len(),
        movies: Arc::new(movies),
        failed_sources,
        persisted,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::application::sources::SourceError;

    struct FixedSource {
        name: &'static str,
        movies: Vec<MovieRecord>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(name: &'static str, titles: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name,
                movies: titles
                    .iter()
                    .map(|title| MovieRecord::new(*title, Some(2020)))
                    .collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                movies: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MovieSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, limit: usize) -> Result<Vec<MovieRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::Timeout);
            }
            Ok(self.movies.iter().take(limit).cloned().collect())
        }

        async fn search(&self, query: &str) -> Result<Vec<MovieRecord>, SourceError> {
            if self.fail {
                return Err(SourceError::Timeout);
            }
            Ok(self
                .movies
                .iter()
                .filter(|movie| movie.title.to_lowercase().contains(query))
                .cloned()
                .collect())
        }
    }

    fn dyn_sources(list: Vec<Arc<FixedSource>>) -> Vec<Arc<dyn MovieSource>> {
        list.into_iter()
            .map(|source| source as Arc<dyn MovieSource>)
            .collect()
    }

    fn store(dir: &TempDir) -> Arc<SnapshotStore> {
        Arc::new(SnapshotStore::open(
            dir.path().join("movies.json"),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn failed_source_does_not_sink_the_cycle() {
        let dir = TempDir::new().expect("tempdir");
        let good = FixedSource::new("good", &["Alpha", "Beta"]);
        let dup = FixedSource::new("dup", &["alpha "]);
        let ingestor = Ingestor::new(
            dyn_sources(vec![good, dup, FixedSource::failing("bad")]),
            store(&dir),
            10,
        );

        let cycle = ingestor.fetch().await.expect("fetch").into_inner();

        assert_eq!(cycle.fetched, 2);
        assert_eq!(cycle.failed_sources, vec!["bad".to_string()]);
        assert!(cycle.persisted);
        assert_eq!(ingestor.snapshot().current().movies.len(), 2);
    }

    #[tokio::test]
    async fn empty_fetch_keeps_previous_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let snapshot = store(&dir);
        snapshot
            .save(vec![MovieRecord::new("Kept", Some(1999))])
            .await
            .expect("seed");
        let ingestor = Ingestor::new(dyn_sources(vec![FixedSource::failing("bad")]), snapshot, 10);

        let cycle = ingestor.fetch().await.expect("fetch").into_inner();

        assert!(!cycle.persisted);
        assert_eq!(ingestor.snapshot().current().movies[0].title, "Kept");
    }

    #[tokio::test]
    async fn fresh_snapshot_is_served_without_fetching() {
        let dir = TempDir::new().expect("tempdir");
        let snapshot = store(&dir);
        snapshot
            .save(vec![MovieRecord::new("Fresh", Some(2024))])
            .await
            .expect("seed");
        let source = FixedSource::new("feed", &["Other"]);
        let ingestor = Ingestor::new(dyn_sources(vec![source.clone()]), snapshot, 10);

        let current = ingestor.snapshot_or_refresh().await;

        assert_eq!(current.movies[0].title, "Fresh");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_snapshot_is_refreshed_before_serving() {
        let dir = TempDir::new().expect("tempdir");
        let source = FixedSource::new("feed", &["Movie X"]);
        let ingestor = Ingestor::new(dyn_sources(vec![source.clone()]), store(&dir), 10);

        let current = ingestor.snapshot_or_refresh().await;

        assert_eq!(current.movies.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn live_search_merges_sources() {
        let dir = TempDir::new().expect("tempdir");
        let ingestor = Ingestor::new(
            dyn_sources(vec![
                FixedSource::new("one", &["Inception", "Heat"]),
                FixedSource::new("two", &["Inception"]),
                FixedSource::failing("bad"),
            ]),
            store(&dir),
            10,
        );

        let found = ingestor.search_sources("incep").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].slug, "inception-2020");
    }
}
