//! The cache tier used by the catalog and the refresh coordinator.
//!
//! Wraps whichever backend was selected at startup and exposes typed
//! per-query operations. TTLs come from [`CacheConfig`]; callers never pick them.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::application::repos::BrowseFilter;
use crate::domain::movies::MovieRecord;

use super::backend::{CacheBackend, CacheError, CacheStats};
use super::config::CacheConfig;
use super::keys::CacheKey;
use super::local::LocalCache;
use super::remote::RemoteCache;
use super::value::CacheValue;

const SOURCE: &str = "cache::tier";
const METRIC_CACHE_HIT_TOTAL: &str = "watchlazy_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "watchlazy_cache_miss_total";

#[derive(Clone)]
pub struct CacheTier {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
}

impl CacheTier {
    /// Select the backend once: the shared cache when configured and reachable,
    /// otherwise the in-process cache.
    pub async fn connect(config: CacheConfig) -> Self {
        if let Some(url) = config.remote_url().map(str::to_owned) {
            match RemoteCache::connect(&url, &config).await {
                Ok(remote) => return Self::with_backend(Arc::new(remote), config),
                Err(err) => warn!(
                    target = SOURCE,
                    error = %err,
                    "Shared cache unreachable, falling back to local cache"
                ),
            }
        }

        info!(target = SOURCE, "Using local cache backend");
        Self::local(config)
    }

    pub fn local(config: CacheConfig) -> Self {
        let backend = Arc::new(LocalCache::new(&config));
        Self::with_backend(backend, config)
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    pub async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let value = self
            .backend
            .get(key)
            .await
            .filter(|value| value.kind() == key.kind());

        let kind = key.kind().as_str();
        let backend = self.backend.name();
        if value.is_some() {
            counter!(METRIC_CACHE_HIT_TOTAL, "kind" => kind, "backend" => backend).increment(1);
        } else {
            counter!(METRIC_CACHE_MISS_TOTAL, "kind" => kind, "backend" => backend).increment(1);
        }
        value
    }

    /// Store `value` under `key` with the kind's configured TTL.
    pub async fn set(&self, key: &CacheKey, value: CacheValue) {
        if value.kind() != key.kind() {
            warn!(
                target = SOURCE,
                key = %key,
                value_kind = value.kind().as_str(),
                "Refusing to cache value under a key of another kind"
            );
            return;
        }
        let ttl = self.config.ttl(key.kind());
        self.backend.set(key, value, ttl).await;
    }

    pub async fn invalidate_all(&self) -> Result<(), CacheError> {
        self.backend.invalidate_all().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.backend.stats().await
    }

    pub async fn is_connected(&self) -> bool {
        self.backend.is_connected().await
    }

    // ========================================================================
    // Typed per-query helpers
    // ========================================================================

    pub async fn get_movie(&self, slug: &str) -> Option<(MovieRecord, Vec<MovieRecord>)> {
        match self.get(&CacheKey::movie(slug)).await? {
            CacheValue::MovieRelated { movie, related } => Some((movie, related)),
            _ => None,
        }
    }

    pub async fn set_movie(&self, slug: &str, movie: MovieRecord, related: Vec<MovieRecord>) {
        self.set(
            &CacheKey::movie(slug),
            CacheValue::MovieRelated { movie, related },
        )
        .await;
    }

    pub async fn get_top_rated(&self, limit: usize) -> Option<Vec<MovieRecord>> {
        match self.get(&CacheKey::top_rated(limit)).await? {
            CacheValue::TopRated { movies } => Some(movies),
            _ => None,
        }
    }

    pub async fn set_top_rated(&self, limit: usize, movies: Vec<MovieRecord>) {
        self.set(&CacheKey::top_rated(limit), CacheValue::TopRated { movies })
            .await;
    }

    pub async fn get_browse(
        &self,
        filter: &BrowseFilter,
        page: u32,
    ) -> Option<(Vec<MovieRecord>, u64)> {
        match self.get(&CacheKey::browse(filter, page)).await? {
            CacheValue::Browse { movies, total } => Some((movies, total)),
            _ => None,
        }
    }

    pub async fn set_browse(
        &self,
        filter: &BrowseFilter,
        page: u32,
        movies: Vec<MovieRecord>,
        total: u64,
    ) {
        self.set(
            &CacheKey::browse(filter, page),
            CacheValue::Browse { movies, total },
        )
        .await;
    }

    pub async fn get_search(&self, query: &str) -> Option<Vec<MovieRecord>> {
        match self.get(&CacheKey::search(query)).await? {
            CacheValue::Search { movies } => Some(movies),
            _ => None,
        }
    }

    pub async fn set_search(&self, query: &str, movies: Vec<MovieRecord>) {
        self.set(&CacheKey::search(query), CacheValue::Search { movies })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mismatched_kind_is_not_stored() {
        let tier = CacheTier::local(CacheConfig::default());
        let key = CacheKey::search("inception");
        tier.set(&key, CacheValue::TopRated { movies: Vec::new() })
            .await;
        assert!(tier.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn missing_remote_url_selects_local() {
        let tier = CacheTier::connect(CacheConfig::default()).await;
        assert_eq!(tier.backend_name(), "local");
        assert!(tier.is_connected().await);
    }

    #[tokio::test]
    async fn typed_helpers_share_keys_with_raw_access() {
        let tier = CacheTier::local(CacheConfig::default());
        let movie = MovieRecord::new("Inception", Some(2010));
        tier.set_movie(&movie.slug, movie.clone(), Vec::new()).await;

        let raw = tier.get(&CacheKey::movie("inception-2010")).await;
        assert!(matches!(raw, Some(CacheValue::MovieRelated { .. })));
        let (cached, related) = tier.get_movie("inception-2010").await.expect("cached");
        assert_eq!(cached, movie);
        assert!(related.is_empty());
    }
}
