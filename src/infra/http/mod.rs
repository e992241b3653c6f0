//! JSON surfaces over the catalog and the refresh coordinator.
//!
//! Every catalog response names the tier that answered so callers can tell a
//! cached answer from a store or snapshot one.

mod admin;
mod middleware;
mod public;
#[cfg(test)]
mod tests;

pub use admin::build_admin_router;
pub use public::build_public_router;

use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::application::{
    catalog::{CatalogService, HealthReport, Resolved, Tier},
    refresh::RefreshCoordinator,
};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogService>,
    pub refresh: Arc<RefreshCoordinator>,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    tier: Option<Tier>,
    data: T,
}

/// A single resource: missing everywhere is a 404.
fn item_response<T: Serialize>(resolved: Resolved<T>) -> Response {
    match resolved {
        Resolved::Hit { tier, value } => Json(Envelope {
            tier: Some(tier),
            data: value,
        })
        .into_response(),
        Resolved::Empty => (
            StatusCode::NOT_FOUND,
            Json(json!({ "tier": null, "error": "no data available" })),
        )
            .into_response(),
    }
}

/// A collection: missing everywhere is an empty answer, not an error.
fn collection_response<T: Serialize>(resolved: Resolved<T>, empty: T) -> Response {
    let tier = resolved.tier();
    let data = resolved.into_value().unwrap_or(empty);
    Json(Envelope { tier, data }).into_response()
}

/// Healthy while some tier can answer reads.
fn health_response(report: HealthReport) -> Response {
    let serving = report.store.connected || report.snapshot.movies > 0;
    let status = if serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
