use axum::{
    Router,
    extract::{Path, Query, State},
    middleware,
    response::Response,
    routing::get,
};
use serde::Deserialize;

use crate::{
    application::{
        catalog::{BrowsePage, Facets},
        repos::BrowseFilter,
    },
    domain::movies::Availability,
};

use super::{
    AppState, collection_response, health_response, item_response,
    middleware::{log_responses, set_request_context},
};

const DEFAULT_TOP_LIMIT: u32 = 20;
const MAX_TOP_LIMIT: u32 = 100;

pub fn build_public_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/movies/top", get(top_rated))
        .route("/api/movies/{slug}", get(movie_detail))
        .route("/api/browse", get(browse))
        .route("/api/search", get(search))
        .route("/api/lists", get(curated_lists))
        .route("/api/lists/{slug}", get(curated_list))
        .route("/api/genres", get(facets))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct TopQuery {
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BrowseQuery {
    genre: Option<String>,
    service: Option<String>,
    availability: Option<String>,
    min_rating: Option<f64>,
    page: Option<u32>,
}

impl BrowseQuery {
    fn filter(&self) -> BrowseFilter {
        BrowseFilter {
            genre: self.genre.clone(),
            service: self.service.clone(),
            availability: self.availability.as_deref().and_then(Availability::parse_filter),
            min_rating: self.min_rating,
        }
        .normalized()
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn health(State(state): State<AppState>) -> Response {
    health_response(state.catalog.health().await)
}

async fn top_rated(State(state): State<AppState>, Query(query): Query<TopQuery>) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TOP_LIMIT)
        .clamp(1, MAX_TOP_LIMIT);
    collection_response(state.catalog.top_rated(limit).await, Vec::new())
}

async fn movie_detail(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    item_response(state.catalog.movie(&slug).await)
}

async fn browse(State(state): State<AppState>, Query(query): Query<BrowseQuery>) -> Response {
    let page = query.page.unwrap_or(1).max(1);
    let resolved = state.catalog.browse(&query.filter(), page).await;
    collection_response(resolved, BrowsePage::new(Vec::new(), 0, page))
}

async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Response {
    collection_response(state.catalog.search(&query.q).await, Vec::new())
}

async fn curated_lists(State(state): State<AppState>) -> Response {
    collection_response(state.catalog.curated_lists().await, Vec::new())
}

async fn curated_list(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    item_response(state.catalog.curated_list(&slug).await)
}

async fn facets(State(state): State<AppState>) -> Response {
    collection_response(state.catalog.genres_and_services().await, Facets::default())
}
