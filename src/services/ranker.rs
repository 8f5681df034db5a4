use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{profile::PreferenceProfileBuilder, similarity};
use crate::{
    db::{RecommendationStore, UserStore},
    error::{AppError, AppResult},
    models::{is_usable_embedding, CandidateFace, PreferenceProfile, RankedCandidate, Recommendation},
};

/// Upper bound on `limit` for generating or listing recommendations
pub const MAX_RECOMMENDATIONS: usize = 100;

/// A fresh ranking together with the profile it was scored against
#[derive(Debug, Clone, Serialize)]
pub struct Ranking {
    pub profile: PreferenceProfile,
    pub candidates: Vec<RankedCandidate>,
}

/// Scores other users' faces against a completed user's preference vector
pub struct RecommendationRanker {
    profiles: Arc<PreferenceProfileBuilder>,
    users: Arc<dyn UserStore>,
    recommendations: Arc<dyn RecommendationStore>,
}

impl RecommendationRanker {
    pub fn new(
        profiles: Arc<PreferenceProfileBuilder>,
        users: Arc<dyn UserStore>,
        recommendations: Arc<dyn RecommendationStore>,
    ) -> Self {
        Self {
            profiles,
            users,
            recommendations,
        }
    }

    /// Builds the profile and ranks every other user with a usable primary
    /// face. Nothing is persisted; see [`Self::persist`].
    pub async fn generate(&self, user_id: Uuid, limit: usize, min_similarity: f32) -> AppResult<Ranking> {
        check_limit(limit)?;
        if !(-1.0..=1.0).contains(&min_similarity) {
            return Err(AppError::InvalidInput(
                "min_similarity must be between -1 and 1".to_string(),
            ));
        }

        let profile = self.profiles.build(user_id).await?;
        let faces = self.users.list_candidates(user_id).await?;
        let scanned = faces.len();
        let candidates = rank_candidates(&profile.preference_vector, faces, limit, min_similarity);

        tracing::info!(
            user_id = %user_id,
            scanned,
            matched = candidates.len(),
            min_similarity,
            "Generated recommendations"
        );

        Ok(Ranking {
            profile,
            candidates,
        })
    }

    /// Replaces the saved recommendations with `ranked`, ranks 1..N in order
    pub async fn persist(&self, user_id: Uuid, ranked: &[RankedCandidate]) -> AppResult<Vec<Recommendation>> {
        let created_at = Utc::now();
        let rows: Vec<Recommendation> = ranked
            .iter()
            .zip(1u32..)
            .map(|(candidate, rank)| Recommendation {
                source_user_id: user_id,
                target_user_id: candidate.user_id,
                similarity_score: candidate.similarity_score,
                rank,
                created_at,
            })
            .collect();

        self.recommendations
            .replace_recommendations(user_id, rows.clone())
            .await?;
        Ok(rows)
    }

    pub async fn saved(&self, user_id: Uuid, limit: usize) -> AppResult<Vec<Recommendation>> {
        check_limit(limit)?;
        self.users
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;
        self.recommendations.list_recommendations(user_id, limit).await
    }
}

fn check_limit(limit: usize) -> AppResult<()> {
    if limit == 0 || limit > MAX_RECOMMENDATIONS {
        return Err(AppError::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_RECOMMENDATIONS
        )));
    }
    Ok(())
}

/// Scores, filters by `min_similarity`, and sorts descending with ties
/// broken by user id. A user appears at most once.
pub fn rank_candidates(
    preference: &[f32],
    faces: Vec<CandidateFace>,
    limit: usize,
    min_similarity: f32,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = faces
        .into_iter()
        .filter(|face| is_usable_embedding(&face.embedding))
        .map(|face| RankedCandidate {
            user_id: face.user_id,
            similarity_score: similarity::cosine_similarity(preference, &face.embedding),
        })
        .filter(|candidate| candidate.similarity_score >= min_similarity)
        .collect();

    ranked.sort_by(|a, b| {
        b.similarity_score
            .total_cmp(&a.similarity_score)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let mut seen = HashSet::new();
    ranked.retain(|candidate| seen.insert(candidate.user_id));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::MemoryStore, models::EMBEDDING_DIM};

    fn face(user_id: Uuid, embedding: Vec<f32>) -> CandidateFace {
        CandidateFace { user_id, embedding }
    }

    fn blend(x: f32) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[0] = 1.0;
        v[1] = x;
        v
    }

    #[test]
    fn test_rank_filters_and_sorts() {
        let preference = blend(0.0);
        let faces: Vec<CandidateFace> = [0.0, 3.0, 0.1, 0.3, 0.05, 10.0, 0.2]
            .into_iter()
            .map(|x| face(Uuid::new_v4(), blend(x)))
            .collect();

        let ranked = rank_candidates(&preference, faces, 5, 0.9);
        assert!(ranked.len() <= 5);
        assert!(ranked.iter().all(|c| c.similarity_score >= 0.9));
        assert!(ranked
            .windows(2)
            .all(|w| w[0].similarity_score >= w[1].similarity_score));
        assert_eq!(ranked.len(), 5);
    }

    #[test]
    fn test_rank_ties_by_user_id_and_dedupes() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let faces = vec![face(b, blend(0.0)), face(a, blend(0.0)), face(a, blend(0.0))];

        let ranked = rank_candidates(&blend(0.0), faces, 10, 0.0);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ranked.iter().map(|c| c.user_id).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_rank_skips_unusable_faces() {
        let faces = vec![face(Uuid::new_v4(), vec![1.0; 3]), face(Uuid::new_v4(), vec![f32::NAN; EMBEDDING_DIM])];
        assert!(rank_candidates(&blend(0.0), faces, 10, -1.0).is_empty());
    }

    #[tokio::test]
    async fn test_persist_assigns_ranks_and_replaces() {
        let store = Arc::new(MemoryStore::new());
        let profiles = Arc::new(PreferenceProfileBuilder::new(store.clone(), store.clone(), store.clone()));
        let ranker = RecommendationRanker::new(profiles, store.clone(), store.clone());
        let user_id = Uuid::new_v4();

        let first: Vec<RankedCandidate> = (0..3)
            .map(|i| RankedCandidate {
                user_id: Uuid::new_v4(),
                similarity_score: 0.9 - i as f32 * 0.1,
            })
            .collect();
        ranker.persist(user_id, &first).await.unwrap();

        let second = vec![first[2]];
        let rows = ranker.persist(user_id, &second).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rank, 1);

        let saved = store.list_recommendations(user_id, 10).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].target_user_id, first[2].user_id);
    }

    #[tokio::test]
    async fn test_limit_bounds() {
        let store = Arc::new(MemoryStore::new());
        let profiles = Arc::new(PreferenceProfileBuilder::new(store.clone(), store.clone(), store.clone()));
        let ranker = RecommendationRanker::new(profiles, store.clone(), store.clone());

        let err = ranker.generate(Uuid::new_v4(), 0, 0.5).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        let err = ranker.generate(Uuid::new_v4(), 5, 1.5).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
