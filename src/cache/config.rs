//! Cache configuration.
//!
//! Per-kind capacities and TTLs plus the optional shared backend connection.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::CacheKind;

// Default values for cache configuration
const DEFAULT_MOVIE_RELATED_CAPACITY: usize = 200;
const DEFAULT_TOP_RATED_CAPACITY: usize = 10;
const DEFAULT_BROWSE_CAPACITY: usize = 100;
const DEFAULT_SEARCH_CAPACITY: usize = 50;
const DEFAULT_MOVIE_RELATED_TTL_SECS: u64 = 600;
const DEFAULT_TOP_RATED_TTL_SECS: u64 = 600;
const DEFAULT_BROWSE_TTL_SECS: u64 = 300;
const DEFAULT_SEARCH_TTL_SECS: u64 = 300;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 250;
const DEFAULT_REMOTE_POOL_SIZE: usize = 8;
const DEFAULT_REMOTE_NAMESPACE: &str = "watchlazy";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared cache connection string; `None` selects the local backend.
    pub remote_url: Option<String>,
    /// Upper bound for any single remote operation.
    pub remote_timeout_ms: u64,
    pub remote_pool_size: usize,
    /// Prepended to every remote key so deployments can share a server.
    pub remote_namespace: String,
    pub movie_related_capacity: usize,
    pub top_rated_capacity: usize,
    pub browse_capacity: usize,
    pub search_capacity: usize,
    pub movie_related_ttl_secs: u64,
    pub top_rated_ttl_secs: u64,
    pub browse_ttl_secs: u64,
    pub search_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            remote_pool_size: DEFAULT_REMOTE_POOL_SIZE,
            remote_namespace: DEFAULT_REMOTE_NAMESPACE.to_string(),
            movie_related_capacity: DEFAULT_MOVIE_RELATED_CAPACITY,
            top_rated_capacity: DEFAULT_TOP_RATED_CAPACITY,
            browse_capacity: DEFAULT_BROWSE_CAPACITY,
            search_capacity: DEFAULT_SEARCH_CAPACITY,
            movie_related_ttl_secs: DEFAULT_MOVIE_RELATED_TTL_SECS,
            top_rated_ttl_secs: DEFAULT_TOP_RATED_TTL_SECS,
            browse_ttl_secs: DEFAULT_BROWSE_TTL_SECS,
            search_ttl_secs: DEFAULT_SEARCH_TTL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            remote_url: settings.remote_url.clone(),
            remote_timeout_ms: settings.remote_timeout_ms.get(),
            remote_pool_size: settings.remote_pool_size.get() as usize,
            remote_namespace: settings.remote_namespace.clone(),
            movie_related_capacity: settings.movie_related_capacity.get() as usize,
            top_rated_capacity: settings.top_rated_capacity.get() as usize,
            browse_capacity: settings.browse_capacity.get() as usize,
            search_capacity: settings.search_capacity.get() as usize,
            movie_related_ttl_secs: settings.movie_related_ttl_secs.get(),
            top_rated_ttl_secs: settings.top_rated_ttl_secs.get(),
            browse_ttl_secs: settings.browse_ttl_secs.get(),
            search_ttl_secs: settings.search_ttl_secs.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity for `kind` as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self, kind: CacheKind) -> NonZeroUsize {
        let capacity = match kind {
            CacheKind::MovieRelated => self.movie_related_capacity,
            CacheKind::TopRated => self.top_rated_capacity,
            CacheKind::Browse => self.browse_capacity,
            CacheKind::Search => self.search_capacity,
        };
        NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn ttl(&self, kind: CacheKind) -> Duration {
        let secs = match kind {
            CacheKind::MovieRelated => self.movie_related_ttl_secs,
            CacheKind::TopRated => self.top_rated_ttl_secs,
            CacheKind::Browse => self.browse_ttl_secs,
            CacheKind::Search => self.search_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms.max(1))
    }

    /// Returns the configured remote URL, ignoring blank strings.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity_non_zero(CacheKind::MovieRelated).get(), 200);
        assert_eq!(config.capacity_non_zero(CacheKind::TopRated).get(), 10);
        assert_eq!(config.capacity_non_zero(CacheKind::Browse).get(), 100);
        assert_eq!(config.capacity_non_zero(CacheKind::Search).get(), 50);
        assert_eq!(config.ttl(CacheKind::MovieRelated), Duration::from_secs(600));
        assert_eq!(config.ttl(CacheKind::TopRated), Duration::from_secs(600));
        assert_eq!(config.ttl(CacheKind::Browse), Duration::from_secs(300));
        assert_eq!(config.ttl(CacheKind::Search), Duration::from_secs(300));
        assert!(config.remote_url().is_none());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            browse_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.capacity_non_zero(CacheKind::Browse).get(), 1);
    }

    #[test]
    fn blank_remote_url_is_ignored() {
        let config = CacheConfig {
            remote_url: Some("  ".into()),
            ..Default::default()
        };
        assert!(config.remote_url().is_none());
    }
}
