use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::ActingUser,
    models::{BatchItem, CandidateImage, UserProgress},
    routes::AppState,
    services::{
        ledger::{BatchOutcome, ChoiceHistory, ResetOutcome, SingleOutcome},
        selector::DEFAULT_BATCH_LIMIT,
    },
};

#[derive(Debug, Deserialize)]
pub struct ImagesQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    count: usize,
    images: Vec<CandidateImage>,
}

#[derive(Debug, Deserialize)]
pub struct SingleChoiceRequest {
    image_id: Uuid,
    action: String,
    #[serde(default)]
    response_time_ms: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BatchChoiceRequest {
    choices: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    phase: Option<i64>,
}

/// Next images to vote on in the user's current phase
pub async fn images(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Query(query): Query<ImagesQuery>,
) -> AppResult<Json<ImagesResponse>> {
    let images = state
        .selector
        .images_for_user(user_id, query.limit.unwrap_or(DEFAULT_BATCH_LIMIT))
        .await?;
    Ok(Json(ImagesResponse {
        count: images.len(),
        images,
    }))
}

pub async fn submit_single(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Json(request): Json<SingleChoiceRequest>,
) -> AppResult<(StatusCode, Json<SingleOutcome>)> {
    let outcome = state
        .ledger
        .submit_single(user_id, request.image_id, &request.action, request.response_time_ms)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Json(request): Json<BatchChoiceRequest>,
) -> AppResult<(StatusCode, Json<BatchOutcome>)> {
    let outcome = state.ledger.submit_batch(user_id, request.choices).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn progress(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
) -> AppResult<Json<UserProgress>> {
    Ok(Json(state.ledger.get_progress(user_id).await?))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ChoiceHistory>> {
    Ok(Json(state.ledger.get_choices(user_id, query.phase).await?))
}

pub async fn reset(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
) -> AppResult<Json<ResetOutcome>> {
    Ok(Json(state.ledger.reset_all(user_id).await?))
}
