//! Read side of the catalog.
//!
//! Every query resolves through the same ordered pipeline: the cache tier,
//! then the primary store, then the snapshot. Only store answers are written
//! back to the cache; snapshot-derived answers are returned as-is so their
//! staleness stays bounded by the snapshot's own TTL.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::warn;

use crate::cache::{CacheStats, CacheTier, normalize_search_query};
use crate::domain::curated::CuratedList;
use crate::domain::movies::MovieRecord;

use super::ingest::Ingestor;
use super::ranking::{self, MIN_SEARCH_LEN};
use super::repos::{BrowseFilter, CuratedListsRepo, MovieSort, MoviesRepo, RepoError};

const SOURCE: &str = "application::catalog";
const METRIC_QUERY_RESOLVED_TOTAL: &str = "watchlazy_query_resolved_total";

pub const BROWSE_PAGE_SIZE: u32 = 24;
pub const RELATED_LIMIT: u32 = 6;
pub const SEARCH_LIMIT: u32 = 50;

/// The tier that produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Cache,
    Store,
    Snapshot,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Cache => "cache",
            Tier::Store => "store",
            Tier::Snapshot => "snapshot",
        }
    }
}

/// Outcome of a catalog query: which tier answered, or no data anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Hit { tier: Tier, value: T },
    Empty,
}

impl<T> Resolved<T> {
    pub fn tier(&self) -> Option<Tier> {
        match self {
            Resolved::Hit { tier, .. } => Some(*tier),
            Resolved::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Resolved::Empty)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Resolved::Hit { value, .. } => Some(value),
            Resolved::Empty => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Resolved::Hit { value, .. } => Some(value),
            Resolved::Empty => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieDetail {
    pub movie: MovieRecord,
    pub related: Vec<MovieRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowsePage {
    pub movies: Vec<MovieRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl BrowsePage {
    pub fn new(movies: Vec<MovieRecord>, total: u64, page: u32) -> Self {
        Self {
            movies,
            total,
            page,
            page_size: BROWSE_PAGE_SIZE,
            total_pages: total.div_ceil(u64::from(BROWSE_PAGE_SIZE)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CuratedListView {
    pub list: CuratedList,
    pub movies: Vec<MovieRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Facets {
    pub genres: Vec<String>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub configured: bool,
    pub connected: bool,
    pub total_movies: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotHealth {
    pub movies: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub fetched_at: Option<OffsetDateTime>,
    pub age_secs: Option<u64>,
    pub stale: bool,
    pub refresh_in_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store: StoreHealth,
    pub cache: CacheStats,
    pub snapshot: SnapshotHealth,
}

#[derive(Clone)]
pub struct CatalogService {
    cache: CacheTier,
    movies: Option<Arc<dyn MoviesRepo>>,
    lists: Option<Arc<dyn CuratedListsRepo>>,
    ingestor: Arc<Ingestor>,
}

impl CatalogService {
    pub fn new(
        cache: CacheTier,
        movies: Option<Arc<dyn MoviesRepo>>,
        lists: Option<Arc<dyn CuratedListsRepo>>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        Self {
            cache,
            movies,
            lists,
            ingestor,
        }
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    // ========================================================================
    // Cached queries
    // ========================================================================

    pub async fn movie(&self, slug: &str) -> Resolved<MovieDetail> {
        let resolved = self.resolve_movie(slug).await;
        record("movie", &resolved);
        resolved
    }

    async fn resolve_movie(&self, slug: &str) -> Resolved<MovieDetail> {
        if let Some((movie, related)) = self.cache.get_movie(slug).await {
            return hit(Tier::Cache, MovieDetail { movie, related });
        }

        if let Some(store) = self.movies.as_ref() {
            match store.get_by_slug(slug).await {
                Ok(Some(movie)) => {
                    // A partial answer is served but never cached.
                    let related = match store.related(&movie, RELATED_LIMIT).await {
                        Ok(related) => {
                            self.cache
                                .set_movie(slug, movie.clone(), related.clone())
                                .await;
                            related
                        }
                        Err(err) => {
                            store_failed("related", &err);
                            Vec::new()
                        }
                    };
                    return hit(Tier::Store, MovieDetail { movie, related });
                }
                Ok(None) => {}
                Err(err) => store_failed("movie", &err),
            }
        }

        let snapshot = self.ingestor.snapshot_or_refresh().await;
        match ranking::find_by_slug(&snapshot.movies, slug) {
            Some(movie) => hit(
                Tier::Snapshot,
                MovieDetail {
                    related: ranking::related(&snapshot.movies, movie, RELATED_LIMIT as usize),
                    movie: movie.clone(),
                },
            ),
            None => Resolved::Empty,
        }
    }

    pub async fn top_rated(&self, limit: u32) -> Resolved<Vec<MovieRecord>> {
        let resolved = self.resolve_top_rated(limit).await;
        record("top_rated", &resolved);
        resolved
    }

    async fn resolve_top_rated(&self, limit: u32) -> Resolved<Vec<MovieRecord>> {
        let key_limit = limit as usize;
        if let Some(movies) = self.cache.get_top_rated(key_limit).await {
            return hit(Tier::Cache, movies);
        }

        if let Some(store) = self.movies.as_ref() {
            match store.top_rated(limit).await {
                Ok(movies) if !movies.is_empty() => {
                    self.cache.set_top_rated(key_limit, movies.clone()).await;
                    return hit(Tier::Store, movies);
                }
                Ok(_) => {}
                Err(err) => store_failed("top_rated", &err),
            }
        }

        let snapshot = self.ingestor.snapshot_or_refresh().await;
        non_empty(
            Tier::Snapshot,
            ranking::top_rated(&snapshot.movies, key_limit),
        )
    }

    pub async fn browse(&self, filter: &BrowseFilter, page: u32) -> Resolved<BrowsePage> {
        let resolved = self.resolve_browse(filter, page.max(1)).await;
        record("browse", &resolved);
        resolved
    }

    async fn resolve_browse(&self, filter: &BrowseFilter, page: u32) -> Resolved<BrowsePage> {
        if let Some((movies, total)) = self.cache.get_browse(filter, page).await {
            return hit(Tier::Cache, BrowsePage::new(movies, total, page));
        }

        let skip = u64::from(page - 1) * u64::from(BROWSE_PAGE_SIZE);

        if let Some(store) = self.movies.as_ref() {
            let answer = async {
                let total = store.count(filter).await?;
                if total == 0 {
                    return Ok((Vec::new(), 0));
                }
                let movies = store
                    .find(filter, MovieSort::Rating, skip, BROWSE_PAGE_SIZE)
                    .await?;
                Ok::<_, RepoError>((movies, total))
            };
            match answer.await {
                Ok((movies, total)) if total > 0 => {
                    if !movies.is_empty() {
                        self.cache
                            .set_browse(filter, page, movies.clone(), total)
                            .await;
                    }
                    return hit(Tier::Store, BrowsePage::new(movies, total, page));
                }
                Ok(_) => {}
                Err(err) => store_failed("browse", &err),
            }
        }

        let snapshot = self.ingestor.snapshot_or_refresh().await;
        let (movies, total) = ranking::browse(
            &snapshot.movies,
            filter,
            MovieSort::Rating,
            skip as usize,
            BROWSE_PAGE_SIZE as usize,
        );
        if total == 0 {
            return Resolved::Empty;
        }
        hit(Tier::Snapshot, BrowsePage::new(movies, total, page))
    }

    pub async fn search(&self, query: &str) -> Resolved<Vec<MovieRecord>> {
        let resolved = self.resolve_search(query).await;
        record("search", &resolved);
        resolved
    }

    async fn resolve_search(&self, query: &str) -> Resolved<Vec<MovieRecord>> {
        let normalized = normalize_search_query(query);
        if normalized.chars().count() < MIN_SEARCH_LEN {
            return Resolved::Empty;
        }

        if let Some(movies) = self.cache.get_search(&normalized).await {
            return hit(Tier::Cache, movies);
        }

        if let Some(store) = self.movies.as_ref() {
            match store.search(&normalized, SEARCH_LIMIT).await {
                Ok(movies) if !movies.is_empty() => {
                    self.cache.set_search(&normalized, movies.clone()).await;
                    return hit(Tier::Store, movies);
                }
                Ok(_) => {}
                Err(err) => store_failed("search", &err),
            }
        }

        let snapshot = self.ingestor.snapshot_or_refresh().await;
        non_empty(
            Tier::Snapshot,
            ranking::rank_search(&snapshot.movies, &normalized, SEARCH_LIMIT as usize),
        )
    }

    // ========================================================================
    // Read-through queries
    // ========================================================================

    /// Active curated lists. Read through to the store on every call.
    pub async fn curated_lists(&self) -> Resolved<Vec<CuratedList>> {
        let Some(lists) = self.lists.as_ref() else {
            return Resolved::Empty;
        };
        match lists.active_lists().await {
            Ok(found) => non_empty(Tier::Store, found),
            Err(err) => {
                store_failed("curated_lists", &err);
                Resolved::Empty
            }
        }
    }

    /// One list with its member movies in list order; unknown slugs are skipped.
    pub async fn curated_list(&self, slug: &str) -> Resolved<CuratedListView> {
        let Some(lists) = self.lists.as_ref() else {
            return Resolved::Empty;
        };
        let list = match lists.find_list(slug).await {
            Ok(Some(list)) if list.is_active => list,
            Ok(_) => return Resolved::Empty,
            Err(err) => {
                store_failed("curated_list", &err);
                return Resolved::Empty;
            }
        };

        let snapshot = self.ingestor.snapshot().current();
        let mut movies = Vec::with_capacity(list.movie_slugs.len());
        for member in &list.movie_slugs {
            let found = match self.movies.as_ref() {
                Some(store) => match store.get_by_slug(member).await {
                    Ok(found) => found,
                    Err(err) => {
                        store_failed("curated_member", &err);
                        ranking::find_by_slug(&snapshot.movies, member).cloned()
                    }
                },
                None => ranking::find_by_slug(&snapshot.movies, member).cloned(),
            };
            movies.extend(found);
        }

        hit(Tier::Store, CuratedListView { list, movies })
    }

    /// Distinct genres and streaming services for browse filters.
    pub async fn genres_and_services(&self) -> Resolved<Facets> {
        if let Some(store) = self.movies.as_ref() {
            let facets = async {
                Ok::<_, RepoError>(Facets {
                    genres: store.distinct_genres().await?,
                    services: store.distinct_services().await?,
                })
            };
            match facets.await {
                Ok(facets) if !facets.genres.is_empty() || !facets.services.is_empty() => {
                    return hit(Tier::Store, facets);
                }
                Ok(_) => {}
                Err(err) => store_failed("facets", &err),
            }
        }

        let snapshot = self.ingestor.snapshot_or_refresh().await;
        let facets = Facets {
            genres: ranking::distinct_genres(&snapshot.movies),
            services: ranking::distinct_services(&snapshot.movies),
        };
        if facets.genres.is_empty() && facets.services.is_empty() {
            return Resolved::Empty;
        }
        hit(Tier::Snapshot, facets)
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.movies.as_ref() {
            Some(store) => {
                let connected = store.health_check().await.is_ok();
                StoreHealth {
                    configured: true,
                    connected,
                    total_movies: if connected {
                        store.total_count().await.ok()
                    } else {
                        None
                    },
                    last_refresh: if connected {
                        store.last_refresh().await.ok().flatten()
                    } else {
                        None
                    },
                }
            }
            None => StoreHealth {
                configured: false,
                connected: false,
                total_movies: None,
                last_refresh: None,
            },
        };

        let snapshot_store = self.ingestor.snapshot();
        let snapshot = snapshot_store.current();
        let now = OffsetDateTime::now_utc();

        HealthReport {
            store,
            cache: self.cache.stats().await,
            snapshot: SnapshotHealth {
                movies: snapshot.movies.len(),
                fetched_at: snapshot.fetched_at,
                age_secs: snapshot.age_at(now).map(|age| age.as_secs()),
                stale: snapshot.is_stale_at(now, snapshot_store.ttl()),
                refresh_in_progress: self.ingestor.in_progress(),
            },
        }
    }
}

fn hit<T>(tier: Tier, value: T) -> Resolved<T> {
    Resolved::Hit { tier, value }
}

fn non_empty<T>(tier: Tier, values: Vec<T>) -> Resolved<Vec<T>> {
    if values.is_empty() {
        Resolved::Empty
    } else {
        hit(tier, values)
    }
}

fn store_failed(query: &'static str, err: &RepoError) {
    warn!(
        target = SOURCE,
        query,
        error = %err,
        "Store query failed, falling back"
    );
}

fn record<T>(query: &'static str, resolved: &Resolved<T>) {
    let tier = resolved.tier().map_or("empty", Tier::as_str);
    counter!(METRIC_QUERY_RESOLVED_TOTAL, "query" => query, "tier" => tier).increment(1);
}
