//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::curated::CuratedList;
use crate::domain::movies::{Availability, MovieEdit, MovieRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Filters accepted by browse queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowseFilter {
    pub genre: Option<String>,
    pub service: Option<String>,
    pub availability: Option<Availability>,
    pub min_rating: Option<f64>,
}

impl BrowseFilter {
    /// Collapse blank strings and non-positive ratings to "no filter".
    pub fn normalized(&self) -> BrowseFilter {
        fn text(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty() && !value.eq_ignore_ascii_case("all"))
                .map(str::to_string)
        }

        BrowseFilter {
            genre: text(&self.genre),
            service: text(&self.service),
            availability: self.availability,
            min_rating: self.min_rating.filter(|rating| *rating > 0.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized() == BrowseFilter::default()
    }

    pub fn matches(&self, movie: &MovieRecord) -> bool {
        let filter = self.normalized();
        if let Some(genre) = &filter.genre
            && !movie.genres.iter().any(|g| g == genre)
        {
            return false;
        }
        if let Some(service) = &filter.service
            && !movie.is_available_on(service)
        {
            return false;
        }
        if let Some(availability) = filter.availability
            && !movie.streaming.supports(availability)
        {
            return false;
        }
        if let Some(min_rating) = filter.min_rating
            && movie.rating.is_none_or(|rating| rating < min_rating)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovieSort {
    /// Rating descending, then vote count descending.
    #[default]
    Rating,
    /// Newest first.
    Year,
    Popularity,
    /// Alphabetical.
    Title,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub skipped: u64,
}

#[async_trait]
pub trait MoviesRepo: Send + Sync {
    async fn find(
        &self,
        filter: &BrowseFilter,
        sort: MovieSort,
        skip: u64,
        limit: u32,
    ) -> Result<Vec<MovieRecord>, RepoError>;

    async fn count(&self, filter: &BrowseFilter) -> Result<u64, RepoError>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<MovieRecord>, RepoError>;

    async fn related(&self, movie: &MovieRecord, limit: u32)
    -> Result<Vec<MovieRecord>, RepoError>;

    async fn top_rated(&self, limit: u32) -> Result<Vec<MovieRecord>, RepoError>;

    /// Relevance-ranked text search. Queries shorter than two characters match nothing.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<MovieRecord>, RepoError>;

    async fn distinct_genres(&self) -> Result<Vec<String>, RepoError>;

    async fn distinct_services(&self) -> Result<Vec<String>, RepoError>;

    async fn total_count(&self) -> Result<u64, RepoError>;

    async fn last_refresh(&self) -> Result<Option<OffsetDateTime>, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

#[async_trait]
pub trait MoviesWriteRepo: Send + Sync {
    /// Replace-or-insert every record. Returns the number of records written.
    async fn upsert_many(&self, movies: &[MovieRecord]) -> Result<u64, RepoError>;

    /// Insert only records whose slug is not already stored.
    async fn insert_new_only(&self, movies: &[MovieRecord]) -> Result<InsertOutcome, RepoError>;

    async fn update_movie(&self, slug: &str, edit: &MovieEdit) -> Result<MovieRecord, RepoError>;

    async fn delete_movie(&self, slug: &str) -> Result<(), RepoError>;

    async fn set_last_refresh(&self, at: OffsetDateTime) -> Result<(), RepoError>;
}

#[async_trait]
pub trait CuratedListsRepo: Send + Sync {
    /// Active lists ordered by display order.
    async fn active_lists(&self) -> Result<Vec<CuratedList>, RepoError>;

    async fn find_list(&self, slug: &str) -> Result<Option<CuratedList>, RepoError>;

    async fn upsert_list(&self, list: &CuratedList) -> Result<CuratedList, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::movies::{MonetizationType, StreamingOffer};

    #[test]
    fn normalized_drops_blank_and_non_positive_filters() {
        let filter = BrowseFilter {
            genre: Some("  ".into()),
            service: Some("all".into()),
            availability: None,
            min_rating: Some(0.0),
        };
        assert!(filter.is_empty());
    }

    #[test]
    fn matches_applies_every_filter() {
        let mut movie = MovieRecord::new("Inception", Some(2010));
        movie.genres = vec!["Sci-Fi".into()];
        movie.rating = Some(8.8);
        movie.streaming.subscription_offers = vec![StreamingOffer {
            provider_name: "Netflix".into(),
            provider_id: "nfx".into(),
            monetization_type: MonetizationType::Flatrate,
            presentation_type: None,
            price: None,
            currency: "INR".into(),
            url: String::new(),
        }];

        let filter = BrowseFilter {
            genre: Some("Sci-Fi".into()),
            service: Some("Netflix".into()),
            availability: Some(Availability::Subscription),
            min_rating: Some(8.0),
        };
        assert!(filter.matches(&movie));

        let too_strict = BrowseFilter {
            min_rating: Some(9.0),
            ..filter.clone()
        };
        assert!(!too_strict.matches(&movie));

        let wrong_bucket = BrowseFilter {
            availability: Some(Availability::Rent),
            ..filter
        };
        assert!(!wrong_bucket.matches(&movie));
    }
}
