use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// GET /:code
///
/// 302 to the original URL, with the click recorded in the background.
/// Unknown, expired and failed lookups all collapse into a plain 404.
pub async fn redirect(State(state): State<Arc<AppState>>, Path(code): Path<String>) -> Response {
    let location = state
        .resolver
        .resolve(&code)
        .await
        .and_then(|url| HeaderValue::try_from(url).ok());

    match location {
        Some(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        None => (StatusCode::NOT_FOUND, "Short link not found").into_response(),
    }
}
