use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use super::*;
use crate::{
    application::{ingest::Ingestor, refresh::RefreshCoordinator},
    cache::{CacheConfig, CacheTier},
    domain::movies::MovieRecord,
    infra::snapshot::SnapshotStore,
};

fn state(dir: &TempDir) -> AppState {
    let cache = CacheTier::local(CacheConfig::default());
    let snapshot = Arc::new(SnapshotStore::open(
        dir.path().join("movies.json"),
        Duration::from_secs(60),
    ));
    let ingestor = Arc::new(Ingestor::new(Vec::new(), snapshot, 10));
    AppState {
        catalog: Arc::new(CatalogService::new(
            cache.clone(),
            None,
            None,
            Arc::clone(&ingestor),
        )),
        refresh: Arc::new(RefreshCoordinator::new(cache, None, None, ingestor)),
    }
}

async fn call(router: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .expect("request");
    let response = router.oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn unknown_movie_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let router = build_public_router(state(&dir));

    let (status, body) = call(router, Method::GET, "/api/movies/nope-1999", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["tier"], Value::Null);
}

#[tokio::test]
async fn empty_collections_are_ok() {
    let dir = TempDir::new().expect("tempdir");
    let state = state(&dir);

    let (status, body) = call(
        build_public_router(state.clone()),
        Method::GET,
        "/api/search?q=x",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], serde_json::json!([]));

    let (status, body) = call(
        build_public_router(state),
        Method::GET,
        "/api/browse?genre=Drama&page=3",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["page"], 3);
}

#[tokio::test]
async fn snapshot_answers_are_labelled() {
    let dir = TempDir::new().expect("tempdir");
    let state = state(&dir);
    state
        .catalog
        .ingestor()
        .snapshot()
        .save(vec![MovieRecord::new("Heat", Some(1995))])
        .await
        .expect("save snapshot");

    let (status, body) = call(
        build_public_router(state),
        Method::GET,
        "/api/movies/heat-1995",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "snapshot");
    assert_eq!(body["data"]["movie"]["title"], "Heat");
}

#[tokio::test]
async fn health_reflects_servable_tiers() {
    let dir = TempDir::new().expect("tempdir");
    let state = state(&dir);

    let (status, _) = call(build_public_router(state.clone()), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    state
        .catalog
        .ingestor()
        .snapshot()
        .save(vec![MovieRecord::new("Heat", Some(1995))])
        .await
        .expect("save snapshot");
    let (status, body) = call(build_admin_router(state), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshot"]["movies"], 1);
}

#[tokio::test]
async fn incremental_without_store_is_unavailable() {
    let dir = TempDir::new().expect("tempdir");
    let router = build_admin_router(state(&dir));

    let (status, body) = call(router, Method::POST, "/refresh/incremental", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Primary store is not configured");
}

#[tokio::test]
async fn bulk_refresh_reports_leader_run() {
    let dir = TempDir::new().expect("tempdir");
    let router = build_admin_router(state(&dir));

    let (status, body) = call(router, Method::POST, "/refresh", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["joined"], false);
    assert_eq!(body["report"]["fetched"], 0);
}

#[tokio::test]
async fn empty_edit_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let router = build_admin_router(state(&dir));

    let (status, _) = call(router, Method::PATCH, "/movies/heat-1995", Some("{}")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn short_source_search_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let router = build_admin_router(state(&dir));

    let (status, _) = call(router, Method::GET, "/sources/search?q=a", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
