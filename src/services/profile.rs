use std::sync::Arc;

use uuid::Uuid;

use super::similarity;
use crate::{
    db::{ChoiceStore, ImageCatalog, UserStore},
    error::{AppError, AppResult},
    models::{Action, Choice, Phase, PreferenceProfile, UserStatus, TOTAL_CHOICES},
};

/// Weight of a favourable choice by phase and action; PASS carries none.
///
/// Later phases were served from a sharper preference estimate so they are
/// trusted more, and PREFER outranks LIKE within a phase.
pub fn choice_weight(phase: Phase, action: Action) -> Option<f32> {
    match (phase, action) {
        (_, Action::Pass) => None,
        (Phase::One, Action::Like) => Some(1.0),
        (Phase::One, Action::Prefer) => Some(2.0),
        (Phase::Two, Action::Like) => Some(2.0),
        (Phase::Two, Action::Prefer) => Some(3.0),
        (Phase::Three, Action::Like) => Some(3.0),
        (Phase::Three, Action::Prefer) => Some(5.0),
    }
}

/// Turns a completed user's 60 choices into a unit preference vector
pub struct PreferenceProfileBuilder {
    users: Arc<dyn UserStore>,
    images: Arc<dyn ImageCatalog>,
    choices: Arc<dyn ChoiceStore>,
}

impl PreferenceProfileBuilder {
    pub fn new(
        users: Arc<dyn UserStore>,
        images: Arc<dyn ImageCatalog>,
        choices: Arc<dyn ChoiceStore>,
    ) -> Self {
        Self {
            users,
            images,
            choices,
        }
    }

    pub async fn build(&self, user_id: Uuid) -> AppResult<PreferenceProfile> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        let choices = self.choices.list_choices(user_id, None).await?;
        if user.status != UserStatus::Completed || choices.len() < TOTAL_CHOICES {
            return Err(AppError::UserNotCompleted(user_id));
        }

        let favourable: Vec<&Choice> = choices.iter().filter(|c| c.action.is_favorable()).collect();
        if favourable.is_empty() {
            return Err(AppError::NoPreferenceSignal(user_id));
        }

        let ids: Vec<Uuid> = favourable.iter().map(|c| c.image_id).collect();
        let images = self.images.find_by_ids(&ids).await?;

        let mut weighted: Vec<(&[f32], f32)> = Vec::with_capacity(favourable.len());
        for choice in &favourable {
            let Some(weight) = choice_weight(choice.phase, choice.action) else {
                continue;
            };
            match images.iter().find(|i| i.id == choice.image_id) {
                Some(image) if image.has_usable_embedding() => {
                    weighted.push((image.embedding.as_slice(), weight))
                }
                _ => tracing::warn!(
                    user_id = %user_id,
                    image_id = %choice.image_id,
                    "Skipping choice without a usable embedding"
                ),
            }
        }

        let average = similarity::weighted_average(weighted.iter().copied())
            .ok_or(AppError::NoPreferenceSignal(user_id))?;
        let preference_vector = similarity::normalize(&average);

        let preference_strength =
            weighted.iter().map(|(_, w)| w).sum::<f32>() / weighted.len() as f32;

        let mut phase_likes = [0usize; 3];
        for choice in &favourable {
            phase_likes[choice.phase.index()] += 1;
        }
        let total_prefers = choices.iter().filter(|c| c.action == Action::Prefer).count();

        let profile = PreferenceProfile {
            user_id,
            vector_dimension: preference_vector.len(),
            preference_vector,
            total_choices: choices.len(),
            total_likes: favourable.len(),
            total_passes: choices.len() - favourable.len(),
            total_prefers,
            phase_likes,
            preference_strength,
        };

        tracing::info!(
            user_id = %user_id,
            likes = profile.total_likes,
            strength = profile.preference_strength,
            "Built preference profile"
        );

        Ok(profile)
    }
}
