use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{CandidateFace, CandidateImage, Choice, Phase, PrimaryImage, Recommendation, User, UserStatus},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{create_pool, PgStore};

/// Read access to the pool of candidate images
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CandidateImage>>;

    /// Returns only the images that exist, in no particular order
    async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<CandidateImage>>;

    async fn find_by_url(&self, image_url: &str) -> AppResult<Option<CandidateImage>>;

    /// Active images eligible for `phase`, minus `exclude`, ordered by id
    async fn find_eligible_images(
        &self,
        phase: Phase,
        exclude: &HashSet<Uuid>,
    ) -> AppResult<Vec<CandidateImage>>;

    async fn insert_image(&self, image: CandidateImage) -> AppResult<()>;
}

/// A planned ledger write, applied all-or-nothing by [`ChoiceStore::commit`]
#[derive(Debug, Clone)]
pub struct ChoiceCommit {
    pub user_id: Uuid,
    /// Total choices the user had when the write was planned, before any
    /// replacement. A store whose live count differs rejects the commit.
    pub expected_total: usize,
    /// Phase whose existing choices are deleted before inserting
    pub replace_phase: Option<Phase>,
    pub choices: Vec<Choice>,
    /// Status to set on the user once the choices are in
    pub status_after: Option<UserStatus>,
}

/// Append-only storage of choices
#[async_trait]
pub trait ChoiceStore: Send + Sync {
    async fn count_choices(&self, user_id: Uuid) -> AppResult<usize>;

    async fn count_choices_in_phase(&self, user_id: Uuid, phase: Phase) -> AppResult<usize>;

    /// Ordered by creation time, then position
    async fn list_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<Vec<Choice>>;

    async fn has_choice(&self, user_id: Uuid, image_id: Uuid) -> AppResult<bool>;

    /// Applies the whole commit atomically: deletes the replaced phase,
    /// inserts the choices, bumps image counters and updates the status.
    async fn commit(&self, commit: ChoiceCommit) -> AppResult<()>;

    /// Deletes the user's choices in `phase`, or all of them; returns how many
    async fn delete_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<usize>;

    /// Restarts the flow in one atomic step: deletes every choice and saved
    /// recommendation of the user and returns a COMPLETED user to ACTIVE.
    /// Returns how many choices were deleted.
    async fn reset_user(&self, user_id: Uuid) -> AppResult<usize>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;

    async fn insert_user(&self, user: User) -> AppResult<()>;

    async fn set_status(&self, id: Uuid, status: UserStatus) -> AppResult<()>;

    async fn set_primary_image(&self, id: Uuid, image: PrimaryImage) -> AppResult<()>;

    /// Every user other than `exclude` that has a primary image
    async fn list_candidates(&self, exclude: Uuid) -> AppResult<Vec<CandidateFace>>;
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Replaces the user's whole recommendation set in one step
    async fn replace_recommendations(
        &self,
        user_id: Uuid,
        recommendations: Vec<Recommendation>,
    ) -> AppResult<()>;

    /// Ordered by rank
    async fn list_recommendations(&self, user_id: Uuid, limit: usize)
        -> AppResult<Vec<Recommendation>>;
}
