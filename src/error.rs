use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures reported by a `UrlStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("short_id {0} already exists")]
    KeyExists(String),

    #[error("short_id {0} not found")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("malformed record in store: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ShortenerError {
    #[error("short_id {0} not found")]
    NotFound(String),

    #[error("short_id {0} has expired")]
    Expired(String),

    #[error("{0}")]
    ValidationFailure(String),

    #[error("could not allocate a free short_id after {attempts} attempts")]
    CollisionExhausted { attempts: usize },

    #[error("store operation failed: {0}")]
    PersistenceFailure(#[source] StoreError),
}

impl From<StoreError> for ShortenerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => ShortenerError::NotFound(key),
            other => ShortenerError::PersistenceFailure(other),
        }
    }
}

impl ShortenerError {
    /// Stable identifier reported to RPC callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ShortenerError::NotFound(_) => "NotFound",
            ShortenerError::Expired(_) => "Expired",
            ShortenerError::ValidationFailure(_) => "ValidationFailure",
            ShortenerError::CollisionExhausted { .. } => "CollisionExhausted",
            ShortenerError::PersistenceFailure(_) => "PersistenceFailure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ShortenerError::NotFound(_) => StatusCode::NOT_FOUND,
            ShortenerError::Expired(_) => StatusCode::GONE,
            ShortenerError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            ShortenerError::CollisionExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ShortenerError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShortenerError {
    fn into_response(self) -> Response {
        if let ShortenerError::PersistenceFailure(ref e) = self {
            tracing::error!(error = %e, "store failure while serving RPC");
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (self.status(), body).into_response()
    }
}
