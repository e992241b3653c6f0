use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Response,
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};

use crate::{
    application::{
        error::AppError,
        inflight::Flight,
        refresh::{IncrementalReport, RefreshReport},
    },
    domain::{
        curated::CuratedList,
        movies::{MovieEdit, MovieRecord},
    },
};

use super::{
    AppState, health_response,
    middleware::{log_responses, set_request_context},
};

pub fn build_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/refresh", post(bulk_refresh))
        .route("/refresh/incremental", post(incremental_update))
        .route("/movies/{slug}", patch(edit_movie).delete(delete_movie))
        .route("/lists/{slug}", put(upsert_list))
        .route("/sources/search", get(search_sources))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

/// A trigger that found a run in flight reports `joined: true`.
#[derive(Debug, Serialize)]
struct RunResponse<T> {
    joined: bool,
    report: T,
}

impl<T> From<Flight<T>> for RunResponse<T> {
    fn from(flight: Flight<T>) -> Self {
        Self {
            joined: !flight.is_leader(),
            report: flight.into_inner(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SourceSearchQuery {
    #[serde(default)]
    q: String,
}

async fn health(State(state): State<AppState>) -> Response {
    health_response(state.catalog.health().await)
}

async fn bulk_refresh(
    State(state): State<AppState>,
) -> Result<Json<RunResponse<RefreshReport>>, AppError> {
    let flight = state.refresh.bulk_refresh().await?;
    Ok(Json(flight.into()))
}

async fn incremental_update(
    State(state): State<AppState>,
) -> Result<Json<RunResponse<IncrementalReport>>, AppError> {
    let flight = state.refresh.incremental_update().await?;
    Ok(Json(flight.into()))
}

async fn edit_movie(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(edit): Json<MovieEdit>,
) -> Result<Json<MovieRecord>, AppError> {
    let movie = state.refresh.edit_movie(&slug, &edit).await?;
    Ok(Json(movie))
}

async fn delete_movie(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    state.refresh.delete_movie(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_list(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(mut list): Json<CuratedList>,
) -> Result<Json<CuratedList>, AppError> {
    list.slug = slug;
    let saved = state.refresh.upsert_list(&list).await?;
    Ok(Json(saved))
}

async fn search_sources(
    State(state): State<AppState>,
    Query(query): Query<SourceSearchQuery>,
) -> Result<Json<Vec<MovieRecord>>, AppError> {
    let query = query.q.trim();
    if query.len() < 2 {
        return Err(AppError::validation("query must be at least two characters"));
    }
    Ok(Json(state.refresh.search_sources(query).await))
}
