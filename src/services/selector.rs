use std::sync::Arc;

use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

use super::{ledger::ChoiceLedger, similarity};
use crate::{
    db::ImageCatalog,
    error::{AppError, AppResult},
    models::{CandidateImage, Choice, Phase, Stage},
};

/// Default number of images served per request
pub const DEFAULT_BATCH_LIMIT: usize = 20;

/// Largest `limit` a caller may ask for
pub const MAX_BATCH_LIMIT: usize = 100;

/// Relative trust in phase-2 likes vs phase-1 likes when steering phase 3
const PHASE3_WEIGHT_FROM_PHASE2: f32 = 1.0;
const PHASE3_WEIGHT_FROM_PHASE1: f32 = 0.5;

/// Chooses the next batch of pool images to show a user
pub struct PhaseSelector {
    ledger: Arc<ChoiceLedger>,
    images: Arc<dyn ImageCatalog>,
}

impl PhaseSelector {
    pub fn new(ledger: Arc<ChoiceLedger>, images: Arc<dyn ImageCatalog>) -> Self {
        Self { ledger, images }
    }

    /// Images for the user's current phase.
    ///
    /// Phase 1 is a uniform random sample. Phases 2 and 3 rank the pool by
    /// cosine similarity to what the user liked so far, falling back to
    /// random when there is no usable signal. A pool smaller than `limit`
    /// yields a partial batch; an empty pool is `NoImagesForPhase`.
    pub async fn images_for_user(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<CandidateImage>> {
        if limit == 0 || limit > MAX_BATCH_LIMIT {
            return Err(AppError::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_BATCH_LIMIT
            )));
        }

        let progress = self.ledger.get_progress(user_id).await?;
        let phase = match progress.stage {
            Stage::Active { phase, .. } => phase,
            Stage::Completed => return Err(AppError::AllPhasesCompleted),
        };

        let voted = self.ledger.voted_image_ids(user_id).await?;
        let pool = self.images.find_eligible_images(phase, &voted).await?;
        if pool.is_empty() {
            tracing::warn!(user_id = %user_id, phase = %phase, "No images available for phase");
            return Err(AppError::NoImagesForPhase(phase));
        }

        let selected = match phase {
            Phase::One => sample_random(pool, limit, &mut rand::thread_rng()),
            Phase::Two => {
                let liked = self.ledger.favorable_choices(user_id, &[Phase::One]).await?;
                self.select_by_preference(user_id, phase, pool, &liked, limit).await?
            }
            Phase::Three => {
                let liked = self
                    .ledger
                    .favorable_choices(user_id, &[Phase::One, Phase::Two])
                    .await?;
                self.select_by_preference(user_id, phase, pool, &liked, limit).await?
            }
        };

        if selected.is_empty() {
            return Err(AppError::NoImagesForPhase(phase));
        }
        if selected.len() < limit {
            tracing::warn!(
                user_id = %user_id,
                phase = %phase,
                available = selected.len(),
                requested = limit,
                "Fewer images available than requested"
            );
        }

        tracing::info!(user_id = %user_id, phase = %phase, count = selected.len(), "Selected images");
        Ok(selected)
    }

    async fn select_by_preference(
        &self,
        user_id: Uuid,
        phase: Phase,
        pool: Vec<CandidateImage>,
        liked: &[Choice],
        limit: usize,
    ) -> AppResult<Vec<CandidateImage>> {
        let ids: Vec<Uuid> = liked.iter().map(|c| c.image_id).collect();
        let liked_images = self.images.find_by_ids(&ids).await?;

        let weighted: Vec<(Vec<f32>, f32)> = liked
            .iter()
            .filter_map(|choice| {
                let image = liked_images.iter().find(|i| i.id == choice.image_id)?;
                image
                    .has_usable_embedding()
                    .then(|| (image.embedding.clone(), phase_weight(phase, choice.phase)))
            })
            .collect();

        let Some(preference) = preference_vector(&weighted) else {
            tracing::warn!(
                user_id = %user_id,
                phase = %phase,
                liked = liked.len(),
                "No usable preference signal, using random selection"
            );
            return Ok(sample_random(pool, limit, &mut rand::thread_rng()));
        };

        Ok(rank_by_similarity(pool, &preference, limit))
    }
}

/// Weight of an earlier-phase like when steering `target` phase
fn phase_weight(target: Phase, source: Phase) -> f32 {
    match (target, source) {
        (Phase::Three, Phase::Two) => PHASE3_WEIGHT_FROM_PHASE2,
        (Phase::Three, _) => PHASE3_WEIGHT_FROM_PHASE1,
        _ => 1.0,
    }
}

/// Plain mean of weight-scaled embeddings.
///
/// Intentionally not divided by the total weight: only the direction matters
/// for cosine ranking.
fn preference_vector(weighted: &[(Vec<f32>, f32)]) -> Option<Vec<f32>> {
    let scaled: Vec<Vec<f32>> = weighted
        .iter()
        .map(|(embedding, weight)| embedding.iter().map(|x| x * weight).collect())
        .collect();
    similarity::mean_vector(scaled.iter().map(Vec::as_slice))
}

/// Uniform sample without replacement; the whole pool when it fits
pub fn sample_random<R: Rng + ?Sized>(
    mut pool: Vec<CandidateImage>,
    limit: usize,
    rng: &mut R,
) -> Vec<CandidateImage> {
    if pool.len() <= limit {
        return pool;
    }
    let (chosen, _) = pool.partial_shuffle(rng, limit);
    chosen.to_vec()
}

/// Greedy top-`limit` by cosine similarity, ties broken by image id.
/// Images without a usable embedding are skipped.
pub fn rank_by_similarity(
    pool: Vec<CandidateImage>,
    preference: &[f32],
    limit: usize,
) -> Vec<CandidateImage> {
    let mut scored: Vec<(f32, CandidateImage)> = pool
        .into_iter()
        .filter(|image| image.has_usable_embedding())
        .map(|image| (similarity::cosine_similarity(preference, &image.embedding), image))
        .collect();

    scored.sort_by(|(a_score, a), (b_score, b)| {
        b_score.total_cmp(a_score).then_with(|| a.id.cmp(&b.id))
    });

    scored.into_iter().take(limit).map(|(_, image)| image).collect()
}
