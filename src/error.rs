//! Crate-wide error type.
//!
//! Mirrors the five error kinds spec'd for the core: `NotFound`, `Transient`
//! I/O, `Invariant` violations (programming bugs — never silently
//! recovered), `Validation`, and `Capacity`. `auth::middleware::AuthError`
//! hand-rolls a small `IntoResponse` enum for its one call site; this is the
//! same idea generalized with `thiserror` for a type that crosses the
//! library/binary boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient I/O failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invariant(what: impl Into<String>) -> Self {
        Self::Invariant(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Transient(_) => StatusCode::BAD_GATEWAY,
            CoreError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Transient(err)
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound("row".into()),
            other => CoreError::Transient(other.into()),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        if matches!(self, CoreError::Invariant(_)) {
            tracing::error!(error = %self, "invariant violation surfaced to caller");
        }

        let status = self.status();
        let body = Json(json!({ "error": status.as_str(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = CoreError::not_found("pane p1");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invariant_maps_to_500() {
        let err = CoreError::invariant("inverse index missing entry");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn capacity_maps_to_503() {
        let err = CoreError::Capacity("sse send buffer full".into());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
