//! Movie records and their streaming availability.
//!
//! A [`MovieRecord`] is owned by the primary store and the snapshot; the cache
//! layer only ever holds clones of it. The `slug` is the identity used
//! everywhere, including as the per-movie cache key.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::slug::movie_slug;

const DEFAULT_CURRENCY: &str = "INR";

/// How an offer is monetized by its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonetizationType {
    Free,
    Ads,
    Flatrate,
    FlatrateAndAds,
    Rent,
    Buy,
}

impl MonetizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Ads => "ADS",
            Self::Flatrate => "FLATRATE",
            Self::FlatrateAndAds => "FLATRATE_AND_ADS",
            Self::Rent => "RENT",
            Self::Buy => "BUY",
        }
    }
}

/// Availability bucket used by browse filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Free,
    Subscription,
    Rent,
    Buy,
}

impl Availability {
    pub const ALL: [Availability; 4] = [
        Availability::Free,
        Availability::Subscription,
        Availability::Rent,
        Availability::Buy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Subscription => "subscription",
            Self::Rent => "rent",
            Self::Buy => "buy",
        }
    }

    /// Parse a query-string value. `"all"` and blank values mean "no filter".
    pub fn parse_filter(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "subscription" => Some(Self::Subscription),
            "rent" => Some(Self::Rent),
            "buy" => Some(Self::Buy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingOffer {
    pub provider_name: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default = "default_monetization")]
    pub monetization_type: MonetizationType,
    #[serde(default)]
    pub presentation_type: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub url: String,
}

fn default_monetization() -> MonetizationType {
    MonetizationType::Free
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl StreamingOffer {
    fn identity(&self) -> (String, MonetizationType, Option<String>) {
        (
            self.provider_name.to_lowercase(),
            self.monetization_type,
            self.presentation_type.clone(),
        )
    }
}

/// Offers grouped by how the movie can be watched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingAvailability {
    pub free_offers: Vec<StreamingOffer>,
    pub subscription_offers: Vec<StreamingOffer>,
    pub rent_offers: Vec<StreamingOffer>,
    pub buy_offers: Vec<StreamingOffer>,
}

impl StreamingAvailability {
    pub fn is_free(&self) -> bool {
        !self.free_offers.is_empty()
    }

    pub fn is_subscription(&self) -> bool {
        !self.subscription_offers.is_empty()
    }

    pub fn is_rentable(&self) -> bool {
        !self.rent_offers.is_empty()
    }

    pub fn is_buyable(&self) -> bool {
        !self.buy_offers.is_empty()
    }

    pub fn has_any_offer(&self) -> bool {
        self.is_free() || self.is_subscription() || self.is_rentable() || self.is_buyable()
    }

    pub fn min_rent_price(&self) -> Option<f64> {
        min_price(&self.rent_offers)
    }

    pub fn min_buy_price(&self) -> Option<f64> {
        min_price(&self.buy_offers)
    }

    pub fn offers(&self, availability: Availability) -> &[StreamingOffer] {
        match availability {
            Availability::Free => &self.free_offers,
            Availability::Subscription => &self.subscription_offers,
            Availability::Rent => &self.rent_offers,
            Availability::Buy => &self.buy_offers,
        }
    }

    /// Sorted, de-duplicated provider names across every bucket.
    pub fn all_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = Availability::ALL
            .iter()
            .flat_map(|bucket| self.offers(*bucket))
            .map(|offer| offer.provider_name.clone())
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }

    pub fn availability_types(&self) -> Vec<Availability> {
        Availability::ALL
            .into_iter()
            .filter(|bucket| !self.offers(*bucket).is_empty())
            .collect()
    }

    pub fn supports(&self, availability: Availability) -> bool {
        !self.offers(availability).is_empty()
    }

    fn merge_with(&self, other: &StreamingAvailability) -> StreamingAvailability {
        StreamingAvailability {
            free_offers: merge_offers(&self.free_offers, &other.free_offers),
            subscription_offers: merge_offers(
                &self.subscription_offers,
                &other.subscription_offers,
            ),
            rent_offers: merge_offers(&self.rent_offers, &other.rent_offers),
            buy_offers: merge_offers(&self.buy_offers, &other.buy_offers),
        }
    }
}

fn min_price(offers: &[StreamingOffer]) -> Option<f64> {
    offers
        .iter()
        .filter_map(|offer| offer.price)
        .fold(None, |acc: Option<f64>, price| match acc {
            Some(current) if current <= price => Some(current),
            _ => Some(price),
        })
}

fn merge_offers(left: &[StreamingOffer], right: &[StreamingOffer]) -> Vec<StreamingOffer> {
    let mut seen = HashSet::new();
    left.iter()
        .chain(right.iter())
        .filter(|offer| seen.insert(offer.identity()))
        .cloned()
        .collect()
}

/// A movie as stored in the primary store and the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub runtime_minutes: Option<i32>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub backdrop_url: Option<String>,
    #[serde(default)]
    pub trailer_url: Option<String>,
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub streaming: StreamingAvailability,
    /// Legacy provider names reported by sources without structured offers.
    #[serde(default)]
    pub streaming_services: Vec<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl MovieRecord {
    /// Build a record with only a title and year; the slug is derived.
    pub fn new(title: impl Into<String>, year: Option<i32>) -> Self {
        let title = title.into();
        let slug = movie_slug(&title, year);
        Self {
            slug,
            title,
            year,
            genres: Vec::new(),
            rating: None,
            vote_count: None,
            popularity: None,
            synopsis: String::new(),
            cast: Vec::new(),
            director: None,
            runtime_minutes: None,
            original_language: None,
            poster_url: None,
            backdrop_url: None,
            trailer_url: None,
            external_ids: BTreeMap::new(),
            streaming: StreamingAvailability::default(),
            streaming_services: Vec::new(),
            source_urls: Vec::new(),
        }
    }

    /// Recompute the slug from title and year. Sources may omit it.
    pub fn normalize_slug(&mut self) {
        if self.slug.trim().is_empty() {
            self.slug = movie_slug(&self.title, self.year);
        }
    }

    /// Key used to detect the same movie reported by different sources.
    pub fn dedup_key(&self) -> (String, Option<i32>) {
        (self.title.trim().to_lowercase(), self.year)
    }

    /// Providers from structured offers plus legacy service names.
    pub fn streaming_providers(&self) -> Vec<String> {
        let mut providers = self.streaming.all_providers();
        providers.extend(self.streaming_services.iter().cloned());
        providers.sort();
        providers.dedup();
        providers
    }

    pub fn is_available_on(&self, service: &str) -> bool {
        self.streaming_providers()
            .iter()
            .any(|provider| provider == service)
    }

    /// Merge another report of the same movie into this one.
    ///
    /// Scalars keep the first non-empty value; lists are unioned in order.
    pub fn merge_with(&self, other: &MovieRecord) -> MovieRecord {
        MovieRecord {
            slug: self.slug.clone(),
            title: self.title.clone(),
            year: self.year.or(other.year),
            genres: union(&self.genres, &other.genres),
            rating: self.rating.or(other.rating),
            vote_count: self.vote_count.or(other.vote_count),
            popularity: self.popularity.or(other.popularity),
            synopsis: if self.synopsis.is_empty() {
                other.synopsis.clone()
            } else {
                self.synopsis.clone()
            },
            cast: union(&self.cast, &other.cast),
            director: self.director.clone().or_else(|| other.director.clone()),
            runtime_minutes: self.runtime_minutes.or(other.runtime_minutes),
            original_language: self
                .original_language
                .clone()
                .or_else(|| other.original_language.clone()),
            poster_url: self.poster_url.clone().or_else(|| other.poster_url.clone()),
            backdrop_url: self
                .backdrop_url
                .clone()
                .or_else(|| other.backdrop_url.clone()),
            trailer_url: self.trailer_url.clone().or_else(|| other.trailer_url.clone()),
            external_ids: {
                let mut ids = other.external_ids.clone();
                ids.extend(self.external_ids.clone());
                ids
            },
            streaming: self.streaming.merge_with(&other.streaming),
            streaming_services: union(&self.streaming_services, &other.streaming_services),
            source_urls: union(&self.source_urls, &other.source_urls),
        }
    }
}

fn union(left: &[String], right: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    left.iter()
        .chain(right.iter())
        .filter(|value| seen.insert(value.as_str()))
        .cloned()
        .collect()
}

/// Collapse duplicates reported by several sources, keeping first-seen order.
pub fn deduplicate(movies: Vec<MovieRecord>) -> Vec<MovieRecord> {
    let mut order: Vec<(String, Option<i32>)> = Vec::new();
    let mut merged: std::collections::HashMap<(String, Option<i32>), MovieRecord> =
        std::collections::HashMap::new();

    for mut movie in movies {
        movie.normalize_slug();
        let key = movie.dedup_key();
        match merged.get_mut(&key) {
            Some(existing) => *existing = existing.merge_with(&movie),
            None => {
                order.push(key.clone());
                merged.insert(key, movie);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// Admin patch for a single movie. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieEdit {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub genres: Option<Vec<String>>,
    pub rating: Option<f64>,
    pub synopsis: Option<String>,
    pub director: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub trailer_url: Option<String>,
    pub cast: Option<Vec<String>>,
}

impl MovieEdit {
    pub fn is_empty(&self) -> bool {
        self == &MovieEdit::default()
    }

    /// Apply the patch. The slug is never changed by an edit.
    pub fn apply(&self, movie: &mut MovieRecord) {
        if let Some(title) = &self.title {
            movie.title = title.clone();
        }
        if let Some(year) = self.year {
            movie.year = Some(year);
        }
        if let Some(genres) = &self.genres {
            movie.genres = genres.clone();
        }
        if let Some(rating) = self.rating {
            movie.rating = Some(rating);
        }
        if let Some(synopsis) = &self.synopsis {
            movie.synopsis = synopsis.clone();
        }
        if let Some(director) = &self.director {
            movie.director = Some(director.clone());
        }
        if let Some(runtime) = self.runtime_minutes {
            movie.runtime_minutes = Some(runtime);
        }
        if let Some(url) = &self.poster_url {
            movie.poster_url = Some(url.clone());
        }
        if let Some(url) = &self.backdrop_url {
            movie.backdrop_url = Some(url.clone());
        }
        if let Some(url) = &self.trailer_url {
            movie.trailer_url = Some(url.clone());
        }
        if let Some(cast) = &self.cast {
            movie.cast = cast.clone();
        }
    }
}
