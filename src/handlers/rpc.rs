//! JSON RPC surface. Every operation is `POST /rpc/{Operation}` with a JSON
//! body; failures come back as `{ "error": kind, "message": text }`.

use crate::{
    error::ShortenerError,
    models::{Created, Outcome, UrlRecord},
    AppState,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type RpcResult<T> = Result<Json<T>, ShortenerError>;

// ── Request / response types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ShortenUrlRequest {
    pub original_url: String,
    #[serde(default)]
    pub expire_in_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct ShortIdRequest {
    pub short_id: String,
}

#[derive(Debug, Serialize)]
pub struct GetOriginalUrlResponse {
    pub original_url: String,
}

#[derive(Debug, Serialize)]
pub struct IncrementClickResponse {
    pub clicks: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUrlRequest {
    pub short_id: String,
    #[serde(default)]
    pub new_original_url: Option<String>,
    #[serde(default)]
    pub new_expire_in_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAllUrlsRequest {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub last_evaluated_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListAllUrlsResponse {
    pub urls: Vec<UrlRecord>,
    /// Empty once there is nothing left to scan.
    pub last_evaluated_key: String,
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// POST /rpc/ShortenURL
pub async fn shorten_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShortenUrlRequest>,
) -> RpcResult<Created> {
    let created = state
        .shortener
        .create(&req.original_url, req.expire_in_seconds)
        .await?;
    Ok(Json(created))
}

/// POST /rpc/GetOriginalURL
pub async fn get_original_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShortIdRequest>,
) -> RpcResult<GetOriginalUrlResponse> {
    let original_url = state.shortener.resolve(&req.short_id).await?;
    Ok(Json(GetOriginalUrlResponse { original_url }))
}

/// POST /rpc/IncrementClick
pub async fn increment_click(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShortIdRequest>,
) -> RpcResult<IncrementClickResponse> {
    let clicks = state.shortener.increment_clicks(&req.short_id).await?;
    Ok(Json(IncrementClickResponse { clicks }))
}

/// POST /rpc/HealthCheck
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.shortener.is_healthy().await {
        (StatusCode::OK, Json(HealthCheckResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthCheckResponse {
                status: "unhealthy",
            }),
        )
    }
}

/// POST /rpc/GetURLStats
pub async fn get_url_stats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShortIdRequest>,
) -> RpcResult<UrlRecord> {
    Ok(Json(state.shortener.stats(&req.short_id).await?))
}

/// POST /rpc/UpdateURL
pub async fn update_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateUrlRequest>,
) -> RpcResult<Outcome> {
    let outcome = state
        .shortener
        .update(
            &req.short_id,
            req.new_original_url.as_deref(),
            req.new_expire_in_seconds,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /rpc/DeleteURL
pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShortIdRequest>,
) -> RpcResult<Outcome> {
    Ok(Json(state.shortener.delete(&req.short_id).await?))
}

/// POST /rpc/ListAllURLs
pub async fn list_all_urls(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListAllUrlsRequest>,
) -> RpcResult<ListAllUrlsResponse> {
    let page = state
        .shortener
        .list(req.limit, req.last_evaluated_key.as_deref())
        .await?;

    Ok(Json(ListAllUrlsResponse {
        urls: page.records,
        last_evaluated_key: page.next_cursor.unwrap_or_default(),
    }))
}
