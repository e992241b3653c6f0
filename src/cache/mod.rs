//! Watchlazy cache tier
//!
//! Caches the four catalog query shapes (movie with related, top rated,
//! browse page, search) behind one backend contract:
//!
//! - **local**: bounded per-kind LRU stores with TTL expiry, one lock per kind
//! - **remote**: a shared Redis server, degrading to miss/no-op on any failure
//!
//! The backend is chosen once by [`CacheTier::connect`]. Cache contents are
//! derived data only; clearing them never loses anything.

mod backend;
mod config;
mod keys;
mod local;
pub(crate) mod lock;
mod remote;
mod tier;
mod value;

pub use backend::{CacheBackend, CacheError, CacheStats, KindStats};
pub use config::CacheConfig;
pub use keys::{CacheKey, CacheKind, normalize_search_query};
pub use local::LocalCache;
pub use remote::RemoteCache;
pub use tier::CacheTier;
pub use value::CacheValue;
