//! In-memory doubles shared by the integration suites.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Notify;
use watchlazy::application::catalog::CatalogService;
use watchlazy::application::ingest::Ingestor;
use watchlazy::application::ranking;
use watchlazy::application::refresh::RefreshCoordinator;
use watchlazy::application::repos::{
    BrowseFilter, CuratedListsRepo, InsertOutcome, MovieSort, MoviesRepo, MoviesWriteRepo,
    RepoError,
};
use watchlazy::application::sources::{MovieSource, SourceError};
use watchlazy::cache::{CacheConfig, CacheTier};
use watchlazy::domain::curated::CuratedList;
use watchlazy::domain::movies::{MovieEdit, MovieRecord};
use watchlazy::infra::snapshot::SnapshotStore;

pub fn movie(title: &str, year: i32, genres: &[&str], rating: f64) -> MovieRecord {
    let mut movie = MovieRecord::new(title, Some(year));
    movie.genres = genres.iter().map(|genre| genre.to_string()).collect();
    movie.rating = Some(rating);
    movie
}

/// Primary store double with per-operation read counters and a failure switch.
#[derive(Default)]
pub struct MemoryStore {
    movies: Mutex<BTreeMap<String, MovieRecord>>,
    lists: Mutex<BTreeMap<String, CuratedList>>,
    last_refresh: Mutex<Option<OffsetDateTime>>,
    reads: AtomicUsize,
    fail: AtomicBool,
    fail_related_once: AtomicBool,
    related_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_movies(movies: Vec<MovieRecord>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut stored = store.movies.lock().expect("store lock");
            for movie in movies {
                stored.insert(movie.slug.clone(), movie);
            }
        }
        Arc::new(store)
    }

    /// Store reads served since construction.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.movies.lock().expect("store lock").len()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// The next `related` call times out; later ones succeed.
    pub fn fail_next_related(&self) {
        self.fail_related_once.store(true, Ordering::SeqCst);
    }

    pub fn related_calls(&self) -> usize {
        self.related_calls.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<Vec<MovieRecord>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.movies.lock().expect("store lock").values().cloned().collect())
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MoviesRepo for MemoryStore {
    async fn find(
        &self,
        filter: &BrowseFilter,
        sort: MovieSort,
        skip: u64,
        limit: u32,
    ) -> Result<Vec<MovieRecord>, RepoError> {
        let movies = self.read()?;
        Ok(ranking::browse(&movies, filter, sort, skip as usize, limit as usize).0)
    }

    async fn count(&self, filter: &BrowseFilter) -> Result<u64, RepoError> {
        let movies = self.read()?;
        Ok(movies.iter().filter(|movie| filter.matches(movie)).count() as u64)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<MovieRecord>, RepoError> {
        let movies = self.read()?;
        Ok(ranking::find_by_slug(&movies, slug).cloned())
    }

    async fn related(
        &self,
        movie: &MovieRecord,
        limit: u32,
    ) -> Result<Vec<MovieRecord>, RepoError> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_related_once.swap(false, Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let movies = self.read()?;
        Ok(ranking::related(&movies, movie, limit as usize))
    }

    async fn top_rated(&self, limit: u32) -> Result<Vec<MovieRecord>, RepoError> {
        let movies = self.read()?;
        Ok(ranking::top_rated(&movies, limit as usize))
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<MovieRecord>, RepoError> {
        let movies = self.read()?;
        Ok(ranking::rank_search(&movies, query, limit as usize))
    }

    async fn distinct_genres(&self) -> Result<Vec<String>, RepoError> {
        Ok(ranking::distinct_genres(&self.read()?))
    }

    async fn distinct_services(&self) -> Result<Vec<String>, RepoError> {
        Ok(ranking::distinct_services(&self.read()?))
    }

    async fn total_count(&self) -> Result<u64, RepoError> {
        self.check()?;
        Ok(self.len() as u64)
    }

    async fn last_refresh(&self) -> Result<Option<OffsetDateTime>, RepoError> {
        self.check()?;
        Ok(*self.last_refresh.lock().expect("store lock"))
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.check()
    }
}

#[async_trait]
impl MoviesWriteRepo for MemoryStore {
    async fn upsert_many(&self, movies: &[MovieRecord]) -> Result<u64, RepoError> {
        self.check()?;
        let mut stored = self.movies.lock().expect("store lock");
        for movie in movies {
            stored.insert(movie.slug.clone(), movie.clone());
        }
        Ok(movies.len() as u64)
    }

    async fn insert_new_only(&self, movies: &[MovieRecord]) -> Result<InsertOutcome, RepoError> {
        self.check()?;
        let mut stored = self.movies.lock().expect("store lock");
        let mut outcome = InsertOutcome::default();
        for movie in movies {
            if stored.contains_key(&movie.slug) {
                outcome.skipped += 1;
            } else {
                stored.insert(movie.slug.clone(), movie.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn update_movie(&self, slug: &str, edit: &MovieEdit) -> Result<MovieRecord, RepoError> {
        self.check()?;
        let mut stored = self.movies.lock().expect("store lock");
        let movie = stored.get_mut(slug).ok_or(RepoError::NotFound)?;
        edit.apply(movie);
        Ok(movie.clone())
    }

    async fn delete_movie(&self, slug: &str) -> Result<(), RepoError> {
        self.check()?;
        self.movies
            .lock()
            .expect("store lock")
            .remove(slug)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }

    async fn set_last_refresh(&self, at: OffsetDateTime) -> Result<(), RepoError> {
        self.check()?;
        *self.last_refresh.lock().expect("store lock") = Some(at);
        Ok(())
    }
}

#[async_trait]
impl CuratedListsRepo for MemoryStore {
    async fn active_lists(&self) -> Result<Vec<CuratedList>, RepoError> {
        self.check()?;
        let mut lists: Vec<CuratedList> = self
            .lists
            .lock()
            .expect("store lock")
            .values()
            .filter(|list| list.is_active)
            .cloned()
            .collect();
        lists.sort_by_key(|list| list.display_order);
        Ok(lists)
    }

    async fn find_list(&self, slug: &str) -> Result<Option<CuratedList>, RepoError> {
        self.check()?;
        Ok(self.lists.lock().expect("store lock").get(slug).cloned())
    }

    async fn upsert_list(&self, list: &CuratedList) -> Result<CuratedList, RepoError> {
        self.check()?;
        self.lists
            .lock()
            .expect("store lock")
            .insert(list.slug.clone(), list.clone());
        Ok(list.clone())
    }
}

/// Source double that counts fetches and can hold them until released.
pub struct StaticSource {
    name: &'static str,
    movies: Mutex<Vec<MovieRecord>>,
    fetches: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl StaticSource {
    pub fn new(name: &'static str, movies: Vec<MovieRecord>) -> Arc<Self> {
        Arc::new(Self {
            name,
            movies: Mutex::new(movies),
            fetches: AtomicUsize::new(0),
            gate: None,
        })
    }

    /// Every fetch waits for `gate.notify_one()` before answering.
    pub fn gated(name: &'static str, movies: Vec<MovieRecord>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            name,
            movies: Mutex::new(movies),
            fetches: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn replace(&self, movies: Vec<MovieRecord>) {
        *self.movies.lock().expect("source lock") = movies;
    }
}

#[async_trait]
impl MovieSource for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<MovieRecord>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self
            .movies
            .lock()
            .expect("source lock")
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<MovieRecord>, SourceError> {
        let movies = self.movies.lock().expect("source lock").clone();
        Ok(ranking::rank_search(&movies, query, movies.len()))
    }
}

/// A wired catalog over in-memory doubles.
pub struct Harness {
    pub store: Option<Arc<MemoryStore>>,
    pub cache: CacheTier,
    pub snapshot: Arc<SnapshotStore>,
    pub catalog: CatalogService,
    pub refresh: Arc<RefreshCoordinator>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(store: Option<Arc<MemoryStore>>, sources: Vec<Arc<StaticSource>>) -> Self {
        Self::with_cache(store, sources, CacheTier::local(CacheConfig::default()))
    }

    pub fn with_cache(
        store: Option<Arc<MemoryStore>>,
        sources: Vec<Arc<StaticSource>>,
        cache: CacheTier,
    ) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let snapshot = Arc::new(SnapshotStore::open(
            dir.path().join("movies.json"),
            Duration::from_secs(3_600),
        ));
        let sources = sources
            .into_iter()
            .map(|source| source as Arc<dyn MovieSource>)
            .collect();
        let ingestor = Arc::new(Ingestor::new(sources, Arc::clone(&snapshot), 100));

        let movies = store.clone().map(|store| store as Arc<dyn MoviesRepo>);
        let writer = store.clone().map(|store| store as Arc<dyn MoviesWriteRepo>);
        let lists = store
            .clone()
            .map(|store| store as Arc<dyn CuratedListsRepo>);

        let catalog = CatalogService::new(
            cache.clone(),
            movies,
            lists.clone(),
            Arc::clone(&ingestor),
        );
        let refresh = Arc::new(RefreshCoordinator::new(cache.clone(), writer, lists, ingestor));

        Self {
            store,
            cache,
            snapshot,
            catalog,
            refresh,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        self.store.as_deref().expect("harness has a store")
    }
}
