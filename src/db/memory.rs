use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChoiceCommit, ChoiceStore, ImageCatalog, RecommendationStore, UserStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        CandidateFace, CandidateImage, Choice, Phase, PrimaryImage, Recommendation, User,
        UserStatus,
    },
};

/// Process-local store backing every port with one lock.
///
/// Each method takes the lock exactly once, so a [`ChoiceCommit`] is applied
/// atomically with respect to every other reader and writer.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, User>,
    images: HashMap<Uuid, CandidateImage>,
    /// Insertion order is creation order
    choices: Vec<Choice>,
    recommendations: HashMap<Uuid, Vec<Recommendation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn user_choices(&self, user_id: Uuid) -> impl Iterator<Item = &Choice> {
        self.choices.iter().filter(move |c| c.user_id == user_id)
    }
}

#[async_trait]
impl ImageCatalog for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CandidateImage>> {
        Ok(self.inner.read().await.images.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<CandidateImage>> {
        let inner = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| inner.images.get(id).cloned()).collect())
    }

    async fn find_by_url(&self, image_url: &str) -> AppResult<Option<CandidateImage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .images
            .values()
            .find(|image| image.image_url == image_url)
            .cloned())
    }

    async fn find_eligible_images(
        &self,
        phase: Phase,
        exclude: &HashSet<Uuid>,
    ) -> AppResult<Vec<CandidateImage>> {
        let inner = self.inner.read().await;
        let mut images: Vec<CandidateImage> = inner
            .images
            .values()
            .filter(|image| image.active && image.is_eligible_for(phase))
            .filter(|image| !exclude.contains(&image.id))
            .cloned()
            .collect();
        images.sort_by_key(|image| image.id);
        Ok(images)
    }

    async fn insert_image(&self, image: CandidateImage) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.images.values().any(|i| i.image_url == image.image_url) {
            return Err(AppError::ImageAlreadyRegistered(image.image_url));
        }
        inner.images.insert(image.id, image);
        Ok(())
    }
}

#[async_trait]
impl ChoiceStore for MemoryStore {
    async fn count_choices(&self, user_id: Uuid) -> AppResult<usize> {
        Ok(self.inner.read().await.user_choices(user_id).count())
    }

    async fn count_choices_in_phase(&self, user_id: Uuid, phase: Phase) -> AppResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner.user_choices(user_id).filter(|c| c.phase == phase).count())
    }

    async fn list_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<Vec<Choice>> {
        let inner = self.inner.read().await;
        let mut choices: Vec<Choice> = inner
            .user_choices(user_id)
            .filter(|c| phase.map_or(true, |p| c.phase == p))
            .cloned()
            .collect();
        choices.sort_by_key(|c| (c.created_at, c.phase, c.position));
        Ok(choices)
    }

    async fn has_choice(&self, user_id: Uuid, image_id: Uuid) -> AppResult<bool> {
        let inner = self.inner.read().await;
        let found = inner.user_choices(user_id).any(|c| c.image_id == image_id);
        Ok(found)
    }

    async fn commit(&self, commit: ChoiceCommit) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user_id = commit.user_id;

        if !inner.users.contains_key(&user_id) {
            return Err(AppError::UserNotFound(user_id));
        }
        if inner.user_choices(user_id).count() != commit.expected_total {
            return Err(AppError::ConcurrentSubmission(user_id));
        }

        // Validate everything before touching state
        let remaining: HashSet<Uuid> = inner
            .user_choices(user_id)
            .filter(|c| Some(c.phase) != commit.replace_phase)
            .map(|c| c.image_id)
            .collect();
        let mut incoming = HashSet::new();
        for choice in &commit.choices {
            if remaining.contains(&choice.image_id) || !incoming.insert(choice.image_id) {
                return Err(AppError::DuplicateVote(choice.image_id));
            }
            if !inner.images.contains_key(&choice.image_id) {
                return Err(AppError::ImageNotFound(choice.image_id));
            }
        }

        if let Some(phase) = commit.replace_phase {
            inner
                .choices
                .retain(|c| !(c.user_id == user_id && c.phase == phase));
        }

        for choice in &commit.choices {
            if let Some(image) = inner.images.get_mut(&choice.image_id) {
                image.record_vote(choice.action);
            }
        }
        inner.choices.extend(commit.choices);

        if let Some(status) = commit.status_after {
            if let Some(user) = inner.users.get_mut(&user_id) {
                user.status = status;
                if status == UserStatus::Completed {
                    user.completed_at = Some(Utc::now());
                }
            }
        }

        Ok(())
    }

    async fn delete_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.choices.len();
        inner
            .choices
            .retain(|c| !(c.user_id == user_id && phase.map_or(true, |p| c.phase == p)));
        Ok(before - inner.choices.len())
    }

    async fn reset_user(&self, user_id: Uuid) -> AppResult<usize> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(AppError::UserNotFound(user_id));
        }

        let before = inner.choices.len();
        inner.choices.retain(|c| c.user_id != user_id);
        let deleted = before - inner.choices.len();
        inner.recommendations.remove(&user_id);

        if let Some(user) = inner.users.get_mut(&user_id) {
            if user.status == UserStatus::Completed {
                user.status = UserStatus::Active;
                user.completed_at = None;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: User) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.id) {
            return Err(AppError::InvalidInput(format!("user {} already exists", user.id)));
        }
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: UserStatus) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&id).ok_or(AppError::UserNotFound(id))?;
        user.status = status;
        user.completed_at = match status {
            UserStatus::Completed => Some(Utc::now()),
            _ => None,
        };
        Ok(())
    }

    async fn set_primary_image(&self, id: Uuid, image: PrimaryImage) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(&id).ok_or(AppError::UserNotFound(id))?;
        user.primary_image = Some(image);
        Ok(())
    }

    async fn list_candidates(&self, exclude: Uuid) -> AppResult<Vec<CandidateFace>> {
        let inner = self.inner.read().await;
        let mut faces: Vec<CandidateFace> = inner
            .users
            .values()
            .filter(|user| user.id != exclude)
            .filter_map(|user| {
                user.primary_image.as_ref().map(|image| CandidateFace {
                    user_id: user.id,
                    embedding: image.embedding.clone(),
                })
            })
            .collect();
        faces.sort_by_key(|face| face.user_id);
        Ok(faces)
    }
}

#[async_trait]
impl RecommendationStore for MemoryStore {
    async fn replace_recommendations(
        &self,
        user_id: Uuid,
        recommendations: Vec<Recommendation>,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if recommendations.is_empty() {
            inner.recommendations.remove(&user_id);
        } else {
            inner.recommendations.insert(user_id, recommendations);
        }
        Ok(())
    }

    async fn list_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let inner = self.inner.read().await;
        let mut recommendations = inner
            .recommendations
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        recommendations.sort_by_key(|r| r.rank);
        recommendations.truncate(limit);
        Ok(recommendations)
    }
}
