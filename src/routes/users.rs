use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    error::AppResult,
    middleware::ActingUser,
    models::{PrimaryImage, User, UserStatus},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<UserStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PrimaryImageRequest {
    image_url: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = state.catalog.register_user(request.name, request.status).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn set_primary_image(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Json(request): Json<PrimaryImageRequest>,
) -> AppResult<Json<PrimaryImage>> {
    let image = state.catalog.set_primary_image(user_id, &request.image_url).await?;
    Ok(Json(image))
}
