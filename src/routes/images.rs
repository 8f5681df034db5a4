use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    models::{CandidateImage, NewPoolImage},
    routes::AppState,
};

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewPoolImage>,
) -> AppResult<(StatusCode, Json<CandidateImage>)> {
    let image = state.catalog.register_pool_image(request).await?;
    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn list_for_phase(
    State(state): State<Arc<AppState>>,
    Path(phase): Path<i64>,
) -> AppResult<Json<Vec<CandidateImage>>> {
    Ok(Json(state.catalog.list_phase_images(phase).await?))
}
