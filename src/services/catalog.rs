use std::{collections::HashSet, sync::Arc};

use uuid::Uuid;

use super::embedding::EmbeddingProvider;
use crate::{
    db::{ImageCatalog, UserStore},
    error::{AppError, AppResult},
    models::{CandidateImage, FaceEmbedding, NewPoolImage, Phase, PrimaryImage, User, UserStatus, EMBEDDING_DIM},
};

/// Registers users and the images they vote on or are ranked by
pub struct CatalogService {
    users: Arc<dyn UserStore>,
    images: Arc<dyn ImageCatalog>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_face_confidence: f32,
}

impl CatalogService {
    pub fn new(
        users: Arc<dyn UserStore>,
        images: Arc<dyn ImageCatalog>,
        embedder: Arc<dyn EmbeddingProvider>,
        min_face_confidence: f32,
    ) -> Self {
        Self {
            users,
            images,
            embedder,
            min_face_confidence,
        }
    }

    pub async fn register_user(&self, name: Option<String>, status: Option<UserStatus>) -> AppResult<User> {
        let user = User::new(name, status.unwrap_or(UserStatus::Active));
        self.users.insert_user(user.clone()).await?;
        tracing::info!(user_id = %user.id, status = %user.status, "Registered user");
        Ok(user)
    }

    /// Embeds and stores a new active pool image
    pub async fn register_pool_image(&self, request: NewPoolImage) -> AppResult<CandidateImage> {
        if request.phases.is_empty() {
            return Err(AppError::InvalidInput(
                "an image must be eligible for at least one phase".to_string(),
            ));
        }
        if self.images.find_by_url(&request.image_url).await?.is_some() {
            return Err(AppError::ImageAlreadyRegistered(request.image_url));
        }

        let face = self.embed_checked(&request.image_url).await?;
        let image = CandidateImage::from_registration(request, face);
        self.images.insert_image(image.clone()).await?;

        tracing::info!(
            image_id = %image.id,
            phases = ?image.phase_eligibility,
            confidence = image.confidence,
            "Registered pool image"
        );
        Ok(image)
    }

    /// Every active image eligible for `phase`, ordered by id
    pub async fn list_phase_images(&self, phase: i64) -> AppResult<Vec<CandidateImage>> {
        let phase = Phase::from_filter(phase)?;
        self.images.find_eligible_images(phase, &HashSet::new()).await
    }

    /// Makes `image_url` the user's primary face, replacing any earlier one
    pub async fn set_primary_image(&self, user_id: Uuid, image_url: &str) -> AppResult<PrimaryImage> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        let face = self.embed_checked(image_url).await?;
        let primary = PrimaryImage {
            image_url: image_url.to_string(),
            embedding: face.embedding,
            confidence: face.confidence,
        };
        self.users.set_primary_image(user_id, primary.clone()).await?;

        tracing::info!(user_id = %user_id, confidence = primary.confidence, "Primary image set");
        Ok(primary)
    }

    async fn embed_checked(&self, image_url: &str) -> AppResult<FaceEmbedding> {
        let face = self.embedder.embed(image_url).await?;

        if face.confidence < self.min_face_confidence {
            tracing::warn!(
                image_url = %image_url,
                confidence = face.confidence,
                provider = self.embedder.name(),
                "Face confidence below threshold"
            );
            return Err(AppError::LowFaceConfidence {
                confidence: face.confidence,
                minimum: self.min_face_confidence,
            });
        }
        if face.embedding.len() != EMBEDDING_DIM {
            return Err(AppError::InvalidEmbeddingDimension {
                expected: EMBEDDING_DIM,
                got: face.embedding.len(),
            });
        }
        if face.embedding.iter().any(|x| !x.is_finite()) {
            return Err(AppError::Embedding("embedding contains non-finite values".to_string()));
        }
        Ok(face)
    }
}
