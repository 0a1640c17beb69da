use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AuthError, IntakeError};
use crate::orchestrator::Admission;
use crate::state::SharedState;
use crate::types_jobs::{DeclaredFile, Job, JobStatus};

const DEFAULT_RECENT: usize = 5;

pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/download", post(perform_download))
        .route("/jobs/cancel", post(cancel_job))
        .route("/jobs/:user_id", get(get_job))
        .route("/api/cache/check", post(check_cache))
        .route("/api/cache", delete(invalidate_cache))
        .route("/recent/:user_id", get(recent))
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_bearer(State(state): State<SharedState>, req: Request, next: Next) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Missing)?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::Missing)?;
    if token.trim() != state.api_secret {
        return Err(AuthError::Invalid);
    }
    Ok(next.run(req).await)
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    pub url: String,
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: Option<i64>,
    pub custom_filename: Option<String>,
    pub file_info: Option<DeclaredFile>,
}

pub async fn perform_download(
    State(state): State<SharedState>,
    Json(req): Json<DownloadBody>,
) -> Result<(StatusCode, Json<Admission>), IntakeError> {
    if req.url.trim().is_empty() {
        return Err(IntakeError::Invalid("url is required".to_string()));
    }
    let job = Job::new(req.user_id, req.chat_id, req.url)
        .reply_to(req.message_id)
        .with_declared(req.file_info)
        .with_fallback_filename(req.custom_filename);

    let admission = state.orchestrator.submit(job).await?;
    Ok((StatusCode::ACCEPTED, Json(admission)))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub job_id: Option<Uuid>,
}

pub async fn cancel_job(
    State(state): State<SharedState>,
    Json(req): Json<CancelBody>,
) -> (StatusCode, Json<CancelResponse>) {
    match state.orchestrator.cancel_requester(req.user_id).await {
        Some(outcome) => (
            StatusCode::OK,
            Json(CancelResponse { cancelled: outcome.cancelled, job_id: Some(outcome.job_id) }),
        ),
        None => (StatusCode::NOT_FOUND, Json(CancelResponse { cancelled: false, job_id: None })),
    }
}

pub async fn get_job(
    State(state): State<SharedState>,
    Path(user_id): Path<i64>,
) -> Result<Json<JobStatus>, (StatusCode, String)> {
    state
        .orchestrator
        .status_for(user_id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "no active job".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct UrlBody {
    pub url: String,
}

pub async fn check_cache(
    State(state): State<SharedState>,
    Json(req): Json<UrlBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let resolved = links::resolve(&req.url, &state.orchestrator.config().links);
    let hit = state.cache.lookup(&resolved.url).await.map_err(internal)?;
    let body = match hit {
        Some(entry) => json!({
            "cached": true,
            "url": resolved.url,
            "archive_reference": entry.archive_reference,
            "media_kind": entry.media_kind,
            "filename": entry.filename,
            "size_bytes": entry.size_bytes,
            "cached_at": entry.cached_at,
        }),
        None => json!({ "cached": false, "url": resolved.url }),
    };
    Ok(Json(body))
}

pub async fn invalidate_cache(
    State(state): State<SharedState>,
    Json(req): Json<UrlBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let resolved = links::resolve(&req.url, &state.orchestrator.config().links);
    let deleted = state.cache.delete(&resolved.url).await.map_err(internal)?;
    Ok(Json(json!({ "deleted": deleted, "url": resolved.url })))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn recent(
    State(state): State<SharedState>,
    Path(user_id): Path<i64>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let limit = q.limit.unwrap_or(DEFAULT_RECENT).clamp(1, state.history.limit());
    let records = state.history.recent(user_id, limit).await.map_err(internal)?;
    Ok(Json(json!({ "user_id": user_id, "downloads": records })))
}

pub async fn stats(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let cache = state.cache.stats().await.map_err(internal)?;
    let users = state.history.distinct_requesters().await.map_err(internal)?;
    Ok(Json(json!({
        "cache": {
            "count": cache.count,
            "total_size_bytes": cache.total_size_bytes,
            "total_size": crate::text::format_bytes(cache.total_size_bytes),
        },
        "users": users,
        "queue_size": state.orchestrator.queue_len(),
        "active_jobs": state.orchestrator.active_count().await,
    })))
}

pub async fn health(State(state): State<SharedState>) -> Response {
    let database = match state.store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            warn!("health: database ping failed: {e}");
            "error"
        }
    };
    let status = if database == "ok" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if database == "ok" { "healthy" } else { "degraded" },
            "database": database,
            "queue_size": state.orchestrator.queue_len(),
        })),
    )
        .into_response()
}
