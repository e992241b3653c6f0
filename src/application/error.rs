use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::{refresh::RefreshError, repos::RepoError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Repo(RepoError::InvalidInput { .. })
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Repo(RepoError::Timeout)
            | AppError::Repo(RepoError::Unavailable(_))
            | AppError::Refresh(RefreshError::NoStore)
            | AppError::Refresh(RefreshError::Write { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Repo(RepoError::Persistence(_))
            | AppError::Domain(DomainError::Invariant { .. })
            | AppError::Infra(_)
            | AppError::Refresh(RefreshError::Aborted(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => "Resource not found",
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Repo(RepoError::InvalidInput { .. })
            | AppError::Validation(_) => "Request could not be processed",
            AppError::Repo(RepoError::Timeout) | AppError::Repo(RepoError::Unavailable(_)) => {
                "Service temporarily unavailable"
            }
            AppError::Refresh(RefreshError::NoStore) => "Primary store is not configured",
            AppError::Refresh(RefreshError::Write { .. }) => "Store write failed",
            AppError::Repo(RepoError::Persistence(_)) => "Persistence error",
            AppError::Refresh(RefreshError::Aborted(_)) => "Refresh did not complete",
            AppError::Domain(DomainError::Invariant { .. }) | AppError::Infra(_) => {
                "Unexpected error occurred"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(json!({ "error": message }))).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404_with_report() {
        let response = AppError::Repo(RepoError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["resource not found".to_string()]);
    }

    #[test]
    fn store_timeouts_are_service_unavailable() {
        assert_eq!(
            AppError::Repo(RepoError::Timeout).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::validation("bad slug").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(RefreshError::NoStore).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
