//! Write side of the catalog.
//!
//! Every mutation writes the store first and only then clears the cache. A
//! failed write skips invalidation; a failed invalidation leaves the write in
//! place and relies on entry TTLs to bound staleness.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::cache::CacheTier;
use crate::domain::curated::CuratedList;
use crate::domain::movies::{MovieEdit, MovieRecord};

use super::error::AppError;
use super::inflight::{Flight, FlightError, SingleFlight};
use super::ingest::{FetchCycle, Ingestor};
use super::repos::{CuratedListsRepo, MoviesWriteRepo, RepoError};

const SOURCE: &str = "application::refresh";

#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("primary store is not configured")]
    NoStore,
    #[error("store write failed: {message}")]
    Write { message: String },
    #[error(transparent)]
    Aborted(#[from] FlightError),
}

impl From<RepoError> for RefreshError {
    fn from(err: RepoError) -> Self {
        Self::Write {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    pub fetched: usize,
    pub written: u64,
    pub failed_sources: Vec<String>,
    pub snapshot_persisted: bool,
    pub invalidated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IncrementalReport {
    pub fetched: usize,
    pub inserted: u64,
    pub skipped: u64,
    pub failed_sources: Vec<String>,
    pub invalidated: bool,
}

type Outcome<T> = Result<T, RefreshError>;

#[derive(Clone)]
struct Mutations {
    cache: CacheTier,
    writer: Option<Arc<dyn MoviesWriteRepo>>,
    lists: Option<Arc<dyn CuratedListsRepo>>,
    ingestor: Arc<Ingestor>,
}

pub struct RefreshCoordinator {
    mutations: Mutations,
    bulk: SingleFlight<Outcome<RefreshReport>>,
    incremental: SingleFlight<Outcome<IncrementalReport>>,
}

impl RefreshCoordinator {
    pub fn new(
        cache: CacheTier,
        writer: Option<Arc<dyn MoviesWriteRepo>>,
        lists: Option<Arc<dyn CuratedListsRepo>>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        Self {
            mutations: Mutations {
                cache,
                writer,
                lists,
                ingestor,
            },
            bulk: SingleFlight::new("bulk_refresh"),
            incremental: SingleFlight::new("incremental_update"),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.bulk.in_progress() || self.incremental.in_progress()
    }

    /// Fetch every source, replace-or-insert all records, persist the
    /// snapshot and clear the cache. A trigger that arrives while one is
    /// running receives that run's report.
    pub async fn bulk_refresh(&self) -> Result<Flight<RefreshReport>, RefreshError> {
        let mutations = self.mutations.clone();
        let flight = self.bulk.run(move || mutations.bulk_refresh()).await?;
        lift(flight)
    }

    /// Fetch every source and insert only records the store has not seen.
    pub async fn incremental_update(&self) -> Result<Flight<IncrementalReport>, RefreshError> {
        let mutations = self.mutations.clone();
        let flight = self
            .incremental
            .run(move || mutations.incremental_update())
            .await?;
        lift(flight)
    }

    pub async fn edit_movie(&self, slug: &str, edit: &MovieEdit) -> Result<MovieRecord, AppError> {
        if edit.is_empty() {
            return Err(AppError::validation("edit does not change any field"));
        }
        let writer = self.mutations.writer()?;
        let movie = writer.update_movie(slug, edit).await?;
        self.mutations.invalidate("edit_movie").await;
        info!(target = SOURCE, slug, "Movie edited");
        Ok(movie)
    }

    pub async fn delete_movie(&self, slug: &str) -> Result<(), AppError> {
        let writer = self.mutations.writer()?;
        writer.delete_movie(slug).await?;
        self.mutations.invalidate("delete_movie").await;
        info!(target = SOURCE, slug, "Movie deleted");
        Ok(())
    }

    /// Curated lists are read through on every request, so no invalidation.
    pub async fn upsert_list(&self, list: &CuratedList) -> Result<CuratedList, AppError> {
        list.validate()?;
        let lists = self
            .mutations
            .lists
            .as_ref()
            .ok_or(AppError::Refresh(RefreshError::NoStore))?;
        Ok(lists.upsert_list(list).await?)
    }

    /// Live search across sources without touching the store.
    pub async fn search_sources(&self, query: &str) -> Vec<MovieRecord> {
        self.mutations.ingestor.search_sources(query).await
    }
}

fn lift<T>(flight: Flight<Outcome<T>>) -> Result<Flight<T>, RefreshError> {
    match flight {
        Flight::Leader(outcome) => outcome.map(Flight::Leader),
        Flight::Follower(outcome) => outcome.map(Flight::Follower),
    }
}

impl Mutations {
    fn writer(&self) -> Result<&Arc<dyn MoviesWriteRepo>, AppError> {
        self.writer
            .as_ref()
            .ok_or(AppError::Refresh(RefreshError::NoStore))
    }

    async fn fetch(&self) -> Outcome<FetchCycle> {
        Ok(self.ingestor.fetch().await?.into_inner())
    }

    async fn bulk_refresh(self) -> Outcome<RefreshReport> {
        let cycle = self.fetch().await?;
        let mut report = RefreshReport {
            fetched: cycle.fetched,
            failed_sources: cycle.failed_sources.clone(),
            snapshot_persisted: cycle.persisted,
            ..RefreshReport::default()
        };

        let Some(writer) = self.writer.as_ref() else {
            info!(
                target = SOURCE,
                fetched = report.fetched,
                "No primary store configured, refreshed snapshot only"
            );
            return Ok(report);
        };
        if cycle.movies.is_empty() {
            warn!(target = SOURCE, "Bulk refresh fetched nothing, store left unchanged");
            return Ok(report);
        }

        report.written = writer.upsert_many(&cycle.movies).await?;
        if let Err(err) = writer.set_last_refresh(OffsetDateTime::now_utc()).await {
            warn!(target = SOURCE, error = %err, "Failed to record last refresh time");
        }
        report.invalidated = self.invalidate("bulk_refresh").await;

        info!(
            target = SOURCE,
            fetched = report.fetched,
            written = report.written,
            invalidated = report.invalidated,
            "Bulk refresh finished"
        );
        Ok(report)
    }

    async fn incremental_update(self) -> Outcome<IncrementalReport> {
        let writer = self.writer.clone().ok_or(RefreshError::NoStore)?;
        let cycle = self.fetch().await?;
        let mut report = IncrementalReport {
            fetched: cycle.fetched,
            failed_sources: cycle.failed_sources.clone(),
            ..IncrementalReport::default()
        };
        if cycle.movies.is_empty() {
            return Ok(report);
        }

        let outcome = writer.insert_new_only(&cycle.movies).await?;
        report.inserted = outcome.inserted;
        report.skipped = outcome.skipped;
        if outcome.inserted > 0 {
            report.invalidated = self.invalidate("incremental_update").await;
        }

        info!(
            target = SOURCE,
            inserted = report.inserted,
            skipped = report.skipped,
            invalidated = report.invalidated,
            "Incremental update finished"
        );
        Ok(report)
    }

    async fn invalidate(&self, reason: &'static str) -> bool {
        match self.cache.invalidate_all().await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    reason,
                    error = %err,
                    "Cache invalidation failed, entries will expire by TTL"
                );
                false
            }
        }
    }
}
