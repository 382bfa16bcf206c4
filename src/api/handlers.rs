use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::models::UserId;
use crate::services::content::SimilarItem;
use crate::services::scheduler::{GenerationTrigger, TaskStatus};
use crate::services::Recommendation;

const DEFAULT_SIMILAR_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub movie_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub limit: Option<usize>,
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Stored prediction for one movie, falling back to the baseline list
pub async fn get_recommendation(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<LookupQuery>,
) -> AppResult<Json<Recommendation>> {
    let movie_id = query
        .movie_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("movie_id query parameter is required".to_string()))?;

    let recommendation = state.recommendations.lookup(&user_id, &movie_id).await?;
    Ok(Json(recommendation))
}

/// Kicks off a background generation run for the user
pub async fn trigger_generation(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<(StatusCode, Json<GenerationTrigger>)> {
    let trigger = state.scheduler.request(user_id).await?;
    let status = match trigger {
        GenerationTrigger::Started { .. } => StatusCode::ACCEPTED,
        GenerationTrigger::AlreadyProcessing | GenerationTrigger::AlreadyRecent => StatusCode::OK,
    };
    Ok((status, Json(trigger)))
}

pub async fn generation_status(State(state): State<AppState>, Path(user_id): Path<UserId>) -> Json<TaskStatus> {
    Json(state.scheduler.status(&user_id).await)
}

pub async fn cancel_generation(State(state): State<AppState>, Path(user_id): Path<UserId>) -> Json<Value> {
    let cancelled = state.scheduler.cancel(&user_id).await;
    tracing::info!(user_id = %user_id, cancelled, "Generation cancel request");
    Json(json!({ "cancelled": cancelled }))
}

pub async fn similar_items(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<SimilarQuery>,
) -> AppResult<Json<Vec<SimilarItem>>> {
    let limit = query.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    let similar = state.recommendations.similar_items(&item_id, limit).await?;
    Ok(Json(similar))
}
