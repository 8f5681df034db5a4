use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    middleware::ActingUser,
    models::{PreferenceProfile, Recommendation},
    routes::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_similarity: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    total_choices: usize,
    preference_strength: f32,
    min_similarity: f32,
    recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
pub struct SavedQuery {
    limit: Option<usize>,
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
) -> AppResult<Json<PreferenceProfile>> {
    Ok(Json(state.profiles.build(user_id).await?))
}

impl GenerateRequest {
    /// An empty body means "use the configured defaults"; anything else must
    /// be a valid JSON object
    fn from_body(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidInput(format!("invalid request body: {}", e)))
    }
}

/// Ranks candidates and replaces the saved recommendation set
pub async fn generate(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    body: Bytes,
) -> AppResult<Json<GenerateResponse>> {
    let request = GenerateRequest::from_body(&body)?;
    let limit = request.limit.unwrap_or(state.settings.default_recommendation_limit);
    let min_similarity = request
        .min_similarity
        .unwrap_or(state.settings.default_min_similarity);

    let ranking = state.ranker.generate(user_id, limit, min_similarity).await?;
    let recommendations = state.ranker.persist(user_id, &ranking.candidates).await?;

    Ok(Json(GenerateResponse {
        total_choices: ranking.profile.total_choices,
        preference_strength: ranking.profile.preference_strength,
        min_similarity,
        recommendations,
    }))
}

pub async fn saved(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Query(query): Query<SavedQuery>,
) -> AppResult<Json<Vec<Recommendation>>> {
    let limit = query
        .limit
        .unwrap_or(state.settings.default_recommendation_limit);
    Ok(Json(state.ranker.saved(user_id, limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_body_uses_defaults() {
        let request = GenerateRequest::from_body(b"").unwrap();
        assert!(request.limit.is_none());
        assert!(request.min_similarity.is_none());
        assert!(GenerateRequest::from_body(b" \n").unwrap().limit.is_none());
    }

    #[test]
    fn test_partial_body_keeps_other_default() {
        let request = GenerateRequest::from_body(br#"{"limit": 5}"#).unwrap();
        assert_eq!(request.limit, Some(5));
        assert!(request.min_similarity.is_none());
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        let err = GenerateRequest::from_body(br#"{"limit":"#).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        let err = GenerateRequest::from_body(br#"{"limit": "ten"}"#).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
