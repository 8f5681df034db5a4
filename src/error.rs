use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::Phase;

/// Coarse classification of failures, used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; never retried, the whole request is rejected
    Validation,
    NotFound,
    /// The caller's view of the user's state is stale and must be refreshed
    Conflict,
    /// The user has not finished enough of the flow for the operation
    Precondition,
    Infrastructure,
}

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("User {0} is not active")]
    UserNotActive(Uuid),

    #[error("All phases completed")]
    AllPhasesCompleted,

    #[error("Pool image {0} not found")]
    ImageNotFound(Uuid),

    #[error("Pool image {0} is not active")]
    ImageInactive(Uuid),

    #[error("Pool image {image_id} is not available for phase {phase}")]
    ImageNotEligibleForCurrentPhase { image_id: Uuid, phase: Phase },

    #[error("Invalid action '{value}'{}. Must be LIKE, PASS, or PREFER", .position.map(|p| format!(" at position {}", p)).unwrap_or_default())]
    InvalidAction {
        position: Option<usize>,
        value: String,
    },

    #[error("You already voted for image {0}")]
    DuplicateVote(Uuid),

    #[error("Must submit exactly {expected} choices for a phase, received {received}")]
    InvalidBatchSize { expected: usize, received: usize },

    #[error("Cannot vote for the same image multiple times in one submission")]
    DuplicateImagesInBatch(Vec<Uuid>),

    #[error("Some images are not valid for phase {phase}")]
    InvalidImagesInBatch { phase: Phase, invalid: Vec<String> },

    #[error("Already voted for {} images in previous phases", .0.len())]
    AlreadyVotedInPreviousPhase(Vec<Uuid>),

    #[error("Phase must be 1, 2, or 3, got {0}")]
    InvalidPhaseFilter(i64),

    #[error("No images available for phase {0}")]
    NoImagesForPhase(Phase),

    #[error("User {0} has not completed all phases")]
    UserNotCompleted(Uuid),

    #[error("User {0} has no LIKE/PREFER choices")]
    NoPreferenceSignal(Uuid),

    #[error("Another submission for user {0} was committed concurrently")]
    ConcurrentSubmission(Uuid),

    #[error("Image {0} is already registered")]
    ImageAlreadyRegistered(String),

    #[error("Face confidence {confidence:.3} is below the minimum {minimum:.3}")]
    LowFaceConfidence { confidence: f32, minimum: f32 },

    #[error("Embedding has {got} dimensions, expected {expected}")]
    InvalidEmbeddingDimension { expected: usize, got: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidAction { .. }
            | AppError::InvalidBatchSize { .. }
            | AppError::DuplicateImagesInBatch(_)
            | AppError::InvalidImagesInBatch { .. }
            | AppError::InvalidPhaseFilter(_)
            | AppError::ImageNotEligibleForCurrentPhase { .. }
            | AppError::ImageInactive(_)
            | AppError::LowFaceConfidence { .. }
            | AppError::InvalidEmbeddingDimension { .. }
            | AppError::InvalidInput(_) => ErrorKind::Validation,
            AppError::UserNotFound(_) | AppError::ImageNotFound(_) => ErrorKind::NotFound,
            AppError::UserNotActive(_)
            | AppError::AllPhasesCompleted
            | AppError::DuplicateVote(_)
            | AppError::AlreadyVotedInPreviousPhase(_)
            | AppError::ConcurrentSubmission(_)
            | AppError::ImageAlreadyRegistered(_)
            | AppError::NoImagesForPhase(_) => ErrorKind::Conflict,
            AppError::UserNotCompleted(_) | AppError::NoPreferenceSignal(_) => {
                ErrorKind::Precondition
            }
            AppError::Database(_)
            | AppError::HttpClient(_)
            | AppError::Embedding(_)
            | AppError::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "error.infra.database",
            AppError::HttpClient(_) | AppError::Embedding(_) => "error.infra.embedding",
            AppError::UserNotFound(_) => "error.user.not-found",
            AppError::UserNotActive(_) => "error.user.not-active",
            AppError::AllPhasesCompleted => "error.choice.all-completed",
            AppError::ImageNotFound(_) => "error.image.not-found",
            AppError::ImageInactive(_) => "error.image.not-active",
            AppError::ImageNotEligibleForCurrentPhase { .. } => "error.choice.invalid-phase",
            AppError::InvalidAction { .. } => "error.choice.invalid-action",
            AppError::DuplicateVote(_) => "error.choice.already-exists",
            AppError::InvalidBatchSize { .. } => "error.choice.invalid-count",
            AppError::DuplicateImagesInBatch(_) => "error.choice.duplicate-images",
            AppError::InvalidImagesInBatch { .. } => "error.choice.invalid-phase-images",
            AppError::AlreadyVotedInPreviousPhase(_) => "error.choice.already-voted",
            AppError::InvalidPhaseFilter(_) => "error.validation.invalid-phase",
            AppError::NoImagesForPhase(_) => "error.image.none-available",
            AppError::UserNotCompleted(_) => "error.user.not-completed",
            AppError::NoPreferenceSignal(_) => "error.preference.no-likes",
            AppError::ConcurrentSubmission(_) => "error.choice.concurrent-submission",
            AppError::ImageAlreadyRegistered(_) => "error.image.already-exists",
            AppError::LowFaceConfidence { .. } => "error.image.low-confidence",
            AppError::InvalidEmbeddingDimension { .. } => "error.image.invalid-embedding",
            AppError::InvalidInput(_) => "error.validation.invalid-input",
            AppError::Internal(_) => "error.internal",
        }
    }

    /// Offending ids or positions, for errors that name them
    fn details(&self) -> Option<Value> {
        match self {
            AppError::DuplicateImagesInBatch(ids) => Some(json!({ "duplicate_images": ids })),
            AppError::InvalidImagesInBatch { invalid, .. } => {
                Some(json!({ "invalid_images": invalid }))
            }
            AppError::AlreadyVotedInPreviousPhase(ids) => {
                Some(json!({ "already_voted_images": ids }))
            }
            AppError::InvalidAction { position, value } => {
                Some(json!({ "position": position, "value": value }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation | ErrorKind::Precondition => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Infrastructure => match self {
                AppError::HttpClient(_) | AppError::Embedding(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_bad_request() {
        let response = AppError::InvalidBatchSize {
            expected: 20,
            received: 19,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_precondition_is_distinct_from_not_found() {
        let user = Uuid::new_v4();
        assert_eq!(AppError::NoPreferenceSignal(user).kind(), ErrorKind::Precondition);
        assert_eq!(AppError::UserNotCompleted(user).kind(), ErrorKind::Precondition);
        assert_eq!(AppError::UserNotFound(user).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_state_conflicts_map_to_409() {
        let response = AppError::AllPhasesCompleted.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_action_message_names_position() {
        let err = AppError::InvalidAction {
            position: Some(7),
            value: "MAYBE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid action 'MAYBE' at position 7. Must be LIKE, PASS, or PREFER"
        );
    }

    #[test]
    fn test_embedding_failure_is_bad_gateway() {
        let response = AppError::Embedding("timeout".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
