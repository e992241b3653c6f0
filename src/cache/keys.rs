//! Cache key definitions.
//!
//! Every logical query maps to exactly one [`CacheKey`]. Keys are derived from
//! normalized parameters so equivalent filters always collide.

use std::fmt;

use crate::application::repos::BrowseFilter;

/// The four query shapes the cache tier stores, each with its own bounded store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    MovieRelated,
    TopRated,
    Browse,
    Search,
}

impl CacheKind {
    pub const ALL: [CacheKind; 4] = [
        CacheKind::MovieRelated,
        CacheKind::TopRated,
        CacheKind::Browse,
        CacheKind::Search,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MovieRelated => "movie_related",
            Self::TopRated => "top_rated",
            Self::Browse => "browse",
            Self::Search => "search",
        }
    }

    /// Prefix used by shared backends so kinds can be cleared by pattern.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::MovieRelated => "movie_related:",
            Self::TopRated => "top_rated:",
            Self::Browse => "browse:",
            Self::Search => "search:",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::MovieRelated => 0,
            Self::TopRated => 1,
            Self::Browse => 2,
            Self::Search => 3,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: CacheKind,
    key: String,
}

impl CacheKey {
    pub fn new(kind: CacheKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    /// Per-movie lookups are keyed by slug.
    pub fn movie(slug: &str) -> Self {
        Self::new(CacheKind::MovieRelated, slug)
    }

    pub fn top_rated(limit: usize) -> Self {
        Self::new(CacheKind::TopRated, format!("top:{limit}"))
    }

    /// Fixed-order browse key; absent filters collapse to empty or zero sentinels.
    pub fn browse(filter: &BrowseFilter, page: u32) -> Self {
        let filter = filter.normalized();
        let min_rating = filter.min_rating.unwrap_or(0.0);
        Self::new(
            CacheKind::Browse,
            format!(
                "{}:{}:{}:{}:{}",
                filter.genre.as_deref().unwrap_or(""),
                filter.service.as_deref().unwrap_or(""),
                filter.availability.map(|a| a.as_str()).unwrap_or(""),
                min_rating,
                page.max(1),
            ),
        )
    }

    pub fn search(query: &str) -> Self {
        Self::new(CacheKind::Search, normalize_search_query(query))
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key including the kind prefix, as written to shared backends.
    pub fn storage_key(&self) -> String {
        format!("{}{}", self.kind.prefix(), self.key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.key)
    }
}

pub fn normalize_search_query(query: &str) -> String {
    query.trim().to_lowercase()
}
