use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::{
    db::{ChoiceCommit, ChoiceStore, ImageCatalog, UserStore},
    error::{AppError, AppResult},
    models::{
        phase_of, Action, ActionTally, BatchItem, CandidateImage, Choice, Phase, Stage, User,
        UserProgress, UserStatus, CHOICES_PER_PHASE,
    },
};

/// Per-user async mutexes serialising ledger writes within this process.
///
/// Every read-validate-write sequence for a user runs while holding that
/// user's guard. Across processes the same guarantee comes from the store
/// rejecting a commit whose `expected_total` no longer matches.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub async fn acquire(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody is waiting on so the map does not grow unbounded
            locks.retain(|id, lock| *id == user_id || Arc::strong_count(lock) > 1);
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Result of a single-choice submission
#[derive(Debug, Clone, Serialize)]
pub struct SingleOutcome {
    pub choice: Choice,
    pub progress: UserProgress,
}

/// Result of a 20-choice batch submission
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub choices_created: usize,
    pub phase_completed: Phase,
    /// Stale choices from an aborted attempt that were replaced
    pub replaced_choices: usize,
    pub statistics: ActionTally,
    pub progress: UserProgress,
}

/// A user's choices with LIKE/PASS/PREFER totals
#[derive(Debug, Clone, Serialize)]
pub struct ChoiceHistory {
    pub total: usize,
    pub phase_filter: Option<Phase>,
    pub choices: Vec<Choice>,
    pub statistics: ActionTally,
}

/// What [`ChoiceLedger::reset_all`] removed
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResetOutcome {
    pub deleted_choices: usize,
}

/// Append-only record of user choices and the single source of progress
pub struct ChoiceLedger {
    users: Arc<dyn UserStore>,
    images: Arc<dyn ImageCatalog>,
    choices: Arc<dyn ChoiceStore>,
    locks: UserLocks,
}

impl ChoiceLedger {
    pub fn new(
        users: Arc<dyn UserStore>,
        images: Arc<dyn ImageCatalog>,
        choices: Arc<dyn ChoiceStore>,
    ) -> Self {
        Self {
            users,
            images,
            choices,
            locks: UserLocks::default(),
        }
    }

    async fn require_user(&self, user_id: Uuid) -> AppResult<User> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))
    }

    /// Users may vote only while ACTIVE; a COMPLETED user is reported as done
    fn require_voter(user: &User) -> AppResult<()> {
        match user.status {
            UserStatus::Active => Ok(()),
            UserStatus::Completed => Err(AppError::AllPhasesCompleted),
            UserStatus::Onboarding => Err(AppError::UserNotActive(user.id)),
        }
    }

    async fn progress_of(&self, user_id: Uuid) -> AppResult<UserProgress> {
        let mut counts = [0usize; 3];
        for phase in Phase::ALL {
            counts[phase.index()] = self.choices.count_choices_in_phase(user_id, phase).await?;
        }
        Ok(UserProgress::from_counts(user_id, counts))
    }

    /// Records one vote at the next free position of the current phase
    pub async fn submit_single(
        &self,
        user_id: Uuid,
        image_id: Uuid,
        action: &str,
        response_time_ms: Option<u32>,
    ) -> AppResult<SingleOutcome> {
        let _guard = self.locks.acquire(user_id).await;

        let user = self.require_user(user_id).await?;
        Self::require_voter(&user)?;

        let total = self.choices.count_choices(user_id).await?;
        let (phase, position) = match phase_of(total) {
            Stage::Active { phase, position } => (phase, position),
            Stage::Completed => return Err(AppError::AllPhasesCompleted),
        };

        let image = self
            .images
            .find_by_id(image_id)
            .await?
            .ok_or(AppError::ImageNotFound(image_id))?;
        if !image.active {
            return Err(AppError::ImageInactive(image_id));
        }
        if !image.is_eligible_for(phase) {
            return Err(AppError::ImageNotEligibleForCurrentPhase { image_id, phase });
        }

        let action: Action = action.parse()?;

        if self.choices.has_choice(user_id, image_id).await? {
            return Err(AppError::DuplicateVote(image_id));
        }

        let choice = Choice::new(
            user_id,
            image_id,
            phase,
            position,
            action,
            response_time_ms,
            Utc::now(),
        );
        let status_after = phase_of(total + 1)
            .is_completed()
            .then_some(UserStatus::Completed);

        self.choices
            .commit(ChoiceCommit {
                user_id,
                expected_total: total,
                replace_phase: None,
                choices: vec![choice.clone()],
                status_after,
            })
            .await?;

        let progress = self.progress_of(user_id).await?;

        tracing::info!(
            user_id = %user_id,
            image_id = %image_id,
            action = %action,
            phase = %phase,
            position = position,
            "Choice recorded"
        );

        Ok(SingleOutcome { choice, progress })
    }

    /// Records a full phase of exactly 20 votes, all or nothing.
    ///
    /// Stale choices from an earlier incomplete attempt at the current phase
    /// are replaced, so retrying a phase is always safe.
    pub async fn submit_batch(&self, user_id: Uuid, items: Vec<BatchItem>) -> AppResult<BatchOutcome> {
        if items.len() != CHOICES_PER_PHASE {
            return Err(AppError::InvalidBatchSize {
                expected: CHOICES_PER_PHASE,
                received: items.len(),
            });
        }

        let mut seen = HashSet::new();
        let mut duplicates: Vec<Uuid> = Vec::new();
        for item in &items {
            if !seen.insert(item.image_id) && !duplicates.contains(&item.image_id) {
                duplicates.push(item.image_id);
            }
        }
        if !duplicates.is_empty() {
            return Err(AppError::DuplicateImagesInBatch(duplicates));
        }

        let _guard = self.locks.acquire(user_id).await;

        let user = self.require_user(user_id).await?;
        Self::require_voter(&user)?;

        let total = self.choices.count_choices(user_id).await?;
        let phase = phase_of(total)
            .phase()
            .ok_or(AppError::AllPhasesCompleted)?;

        let stale = self.choices.count_choices_in_phase(user_id, phase).await?;
        let replace_phase = (stale > 0).then_some(phase);
        if stale > 0 {
            tracing::warn!(
                user_id = %user_id,
                phase = %phase,
                count = stale,
                "Incomplete phase found, replacing it with the new batch"
            );
        }

        let ids: Vec<Uuid> = items.iter().map(|item| item.image_id).collect();
        let found: HashMap<Uuid, CandidateImage> = self
            .images
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|image| (image.id, image))
            .collect();
        let invalid: Vec<String> = ids
            .iter()
            .filter_map(|id| match found.get(id) {
                None => Some(format!("{} (not found)", id)),
                Some(image) if !image.active => Some(format!("{} (inactive)", id)),
                Some(image) if !image.is_eligible_for(phase) => {
                    Some(format!("{} (not eligible for phase {})", id, phase))
                }
                Some(_) => None,
            })
            .collect();
        if !invalid.is_empty() {
            return Err(AppError::InvalidImagesInBatch { phase, invalid });
        }

        // Stale choices of the current phase are about to be deleted, so only
        // earlier phases count as already voted
        let batch_ids: HashSet<Uuid> = ids.iter().copied().collect();
        let already_voted: Vec<Uuid> = self
            .choices
            .list_choices(user_id, None)
            .await?
            .into_iter()
            .filter(|c| c.phase != phase && batch_ids.contains(&c.image_id))
            .map(|c| c.image_id)
            .collect();
        if !already_voted.is_empty() {
            return Err(AppError::AlreadyVotedInPreviousPhase(already_voted));
        }

        let actions = items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                item.action.parse::<Action>().map_err(|_| AppError::InvalidAction {
                    position: Some(idx + 1),
                    value: item.action.clone(),
                })
            })
            .collect::<AppResult<Vec<Action>>>()?;

        let now = Utc::now();
        let choices: Vec<Choice> = items
            .iter()
            .zip(actions)
            .enumerate()
            .map(|(idx, (item, action))| {
                Choice::new(
                    user_id,
                    item.image_id,
                    phase,
                    (idx + 1) as u8,
                    action,
                    item.response_time_ms,
                    now,
                )
            })
            .collect();
        let statistics: ActionTally = choices.iter().collect();

        let total_after = total - stale + choices.len();
        let status_after = phase_of(total_after)
            .is_completed()
            .then_some(UserStatus::Completed);

        self.choices
            .commit(ChoiceCommit {
                user_id,
                expected_total: total,
                replace_phase,
                choices,
                status_after,
            })
            .await?;

        let progress = self.progress_of(user_id).await?;

        tracing::info!(
            user_id = %user_id,
            phase = %phase,
            next_phase = progress.current_phase,
            all_completed = progress.all_completed,
            "Batch of {} choices recorded",
            CHOICES_PER_PHASE
        );

        Ok(BatchOutcome {
            choices_created: CHOICES_PER_PHASE,
            phase_completed: phase,
            replaced_choices: stale,
            statistics,
            progress,
        })
    }

    pub async fn get_progress(&self, user_id: Uuid) -> AppResult<UserProgress> {
        self.require_user(user_id).await?;
        self.progress_of(user_id).await
    }

    /// Choices in creation order, optionally restricted to one phase (1..=3)
    pub async fn get_choices(&self, user_id: Uuid, phase: Option<i64>) -> AppResult<ChoiceHistory> {
        let phase_filter = phase.map(Phase::from_filter).transpose()?;
        self.require_user(user_id).await?;

        let choices = self.choices.list_choices(user_id, phase_filter).await?;
        let statistics: ActionTally = choices.iter().collect();

        Ok(ChoiceHistory {
            total: choices.len(),
            phase_filter,
            choices,
            statistics,
        })
    }

    /// Image ids the user has ever voted on, in any phase
    pub async fn voted_image_ids(&self, user_id: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self
            .choices
            .list_choices(user_id, None)
            .await?
            .into_iter()
            .map(|c| c.image_id)
            .collect())
    }

    /// The user's LIKE/PREFER choices in the given phases
    pub async fn favorable_choices(&self, user_id: Uuid, phases: &[Phase]) -> AppResult<Vec<Choice>> {
        Ok(self
            .choices
            .list_choices(user_id, None)
            .await?
            .into_iter()
            .filter(|c| phases.contains(&c.phase) && c.action.is_favorable())
            .collect())
    }

    /// Wipes the user's whole history so they can restart the flow.
    ///
    /// Saved recommendations are cleared too since they were derived from
    /// the deleted choices. The store applies the whole reset or none of it,
    /// so a user is never left with no choices but a COMPLETED status.
    pub async fn reset_all(&self, user_id: Uuid) -> AppResult<ResetOutcome> {
        let _guard = self.locks.acquire(user_id).await;

        self.require_user(user_id).await?;
        let deleted_choices = self.choices.reset_user(user_id).await?;

        tracing::info!(user_id = %user_id, deleted = deleted_choices, "Reset all choices");

        Ok(ResetOutcome { deleted_choices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, RecommendationStore};
    use crate::models::{FaceEmbedding, NewPoolImage, EMBEDDING_DIM};

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: ChoiceLedger,
        user_id: Uuid,
    }

    async fn fixture(status: UserStatus) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = User::new(Some("tester".to_string()), status);
        let user_id = user.id;
        store.insert_user(user).await.unwrap();
        let ledger = ChoiceLedger::new(store.clone(), store.clone(), store.clone());
        Fixture {
            store,
            ledger,
            user_id,
        }
    }

    async fn add_images(store: &MemoryStore, count: usize, phases: &[Phase]) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = Uuid::new_v4();
            let image = CandidateImage::from_registration(
                NewPoolImage {
                    image_url: format!("faces/{}.jpg", id),
                    person_code: None,
                    phases: phases.to_vec(),
                },
                FaceEmbedding {
                    embedding: vec![0.5; EMBEDDING_DIM],
                    confidence: 0.9,
                    attributes: serde_json::Value::Null,
                },
            );
            ids.push(image.id);
            store.insert_image(image).await.unwrap();
        }
        ids
    }

    fn batch(ids: &[Uuid], action: &str) -> Vec<BatchItem> {
        ids.iter()
            .map(|id| BatchItem {
                image_id: *id,
                action: action.to_string(),
                response_time_ms: Some(900),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_batch_advances_to_next_phase() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 20, &[Phase::One]).await;

        let outcome = f.ledger.submit_batch(f.user_id, batch(&ids, "LIKE")).await.unwrap();

        assert_eq!(outcome.phase_completed, Phase::One);
        assert_eq!(outcome.statistics.likes, 20);
        assert_eq!(outcome.progress.current_phase, 2);
        assert_eq!(outcome.progress.phase_progress, "0/20");
        assert_eq!(outcome.progress.total_choices, 20);

        let history = f.ledger.get_choices(f.user_id, Some(1)).await.unwrap();
        let positions: Vec<u8> = history.choices.iter().map(|c| c.position).collect();
        assert_eq!(positions, (1..=20).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_batch_of_nineteen_leaves_ledger_unchanged() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 19, &[Phase::One]).await;

        let result = f.ledger.submit_batch(f.user_id, batch(&ids, "LIKE")).await;

        assert!(matches!(
            result,
            Err(AppError::InvalidBatchSize { expected: 20, received: 19 })
        ));
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_with_repeated_image_is_rejected() {
        let f = fixture(UserStatus::Active).await;
        let mut ids = add_images(&f.store, 19, &[Phase::One]).await;
        ids.push(ids[4]);

        let result = f.ledger.submit_batch(f.user_id, batch(&ids, "PASS")).await;

        assert!(matches!(result, Err(AppError::DuplicateImagesInBatch(d)) if d == vec![ids[4]]));
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_replaces_incomplete_phase() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 30, &[Phase::One]).await;

        for id in &ids[..10] {
            f.ledger.submit_single(f.user_id, *id, "LIKE", None).await.unwrap();
        }
        assert_eq!(f.store.count_choices_in_phase(f.user_id, Phase::One).await.unwrap(), 10);

        // Re-voting five of the stale images is allowed
        let outcome = f
            .ledger
            .submit_batch(f.user_id, batch(&ids[5..25], "PASS"))
            .await
            .unwrap();

        assert_eq!(outcome.replaced_choices, 10);
        assert_eq!(f.store.count_choices_in_phase(f.user_id, Phase::One).await.unwrap(), 20);
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 20);
        assert_eq!(outcome.progress.current_phase, 2);
    }

    #[tokio::test]
    async fn test_invalid_action_reports_position() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 20, &[Phase::One]).await;
        let mut items = batch(&ids, "LIKE");
        items[6].action = "MEH".to_string();

        let result = f.ledger.submit_batch(f.user_id, items).await;

        assert!(matches!(
            result,
            Err(AppError::InvalidAction { position: Some(7), ref value }) if value == "MEH"
        ));
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ineligible_images_are_named() {
        let f = fixture(UserStatus::Active).await;
        let mut ids = add_images(&f.store, 19, &[Phase::One]).await;
        let wrong_phase = add_images(&f.store, 1, &[Phase::Two]).await;
        ids.extend(&wrong_phase);

        let result = f.ledger.submit_batch(f.user_id, batch(&ids, "LIKE")).await;

        match result {
            Err(AppError::InvalidImagesInBatch { phase, invalid }) => {
                assert_eq!(phase, Phase::One);
                assert_eq!(invalid.len(), 1);
                assert!(invalid[0].starts_with(&wrong_phase[0].to_string()));
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.choices_created)),
        }
    }

    #[tokio::test]
    async fn test_images_from_earlier_phase_are_rejected() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 40, &Phase::ALL).await;
        f.ledger.submit_batch(f.user_id, batch(&ids[..20], "LIKE")).await.unwrap();

        let mut second = ids[20..39].to_vec();
        second.push(ids[0]);
        let result = f.ledger.submit_batch(f.user_id, batch(&second, "LIKE")).await;

        assert!(matches!(result, Err(AppError::AlreadyVotedInPreviousPhase(v)) if v == vec![ids[0]]));
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_three_batches_complete_the_user() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 60, &Phase::ALL).await;

        for chunk in ids.chunks(20) {
            f.ledger.submit_batch(f.user_id, batch(chunk, "PREFER")).await.unwrap();
        }

        let progress = f.ledger.get_progress(f.user_id).await.unwrap();
        assert!(progress.all_completed);
        assert_eq!(progress.phase_progress, "20/20");

        let user = f.store.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Completed);
        assert!(user.completed_at.is_some());

        let more = add_images(&f.store, 20, &Phase::ALL).await;
        let result = f.ledger.submit_batch(f.user_id, batch(&more, "LIKE")).await;
        assert!(matches!(result, Err(AppError::AllPhasesCompleted)));
    }

    #[tokio::test]
    async fn test_single_choice_validations() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 2, &[Phase::One]).await;
        let phase_two_only = add_images(&f.store, 1, &[Phase::Two]).await[0];

        let missing = Uuid::new_v4();
        assert!(matches!(
            f.ledger.submit_single(f.user_id, missing, "LIKE", None).await,
            Err(AppError::ImageNotFound(id)) if id == missing
        ));
        assert!(matches!(
            f.ledger.submit_single(f.user_id, phase_two_only, "LIKE", None).await,
            Err(AppError::ImageNotEligibleForCurrentPhase { phase: Phase::One, .. })
        ));
        assert!(matches!(
            f.ledger.submit_single(f.user_id, ids[0], "NOPE", None).await,
            Err(AppError::InvalidAction { position: None, .. })
        ));

        let outcome = f.ledger.submit_single(f.user_id, ids[0], "like", Some(1200)).await.unwrap();
        assert_eq!(outcome.choice.position, 1);
        assert_eq!(outcome.progress.phase_progress, "1/20");

        assert!(matches!(
            f.ledger.submit_single(f.user_id, ids[0], "PASS", None).await,
            Err(AppError::DuplicateVote(id)) if id == ids[0]
        ));

        let image = f.store.find_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!((image.usage_count, image.like_count), (1, 1));
    }

    #[tokio::test]
    async fn test_unknown_and_onboarding_users_cannot_vote() {
        let f = fixture(UserStatus::Onboarding).await;
        let ids = add_images(&f.store, 1, &[Phase::One]).await;

        assert!(matches!(
            f.ledger.submit_single(f.user_id, ids[0], "LIKE", None).await,
            Err(AppError::UserNotActive(_))
        ));

        let stranger = Uuid::new_v4();
        assert!(matches!(
            f.ledger.get_progress(stranger).await,
            Err(AppError::UserNotFound(id)) if id == stranger
        ));
    }

    #[tokio::test]
    async fn test_choice_filter_must_be_a_phase() {
        let f = fixture(UserStatus::Active).await;
        assert!(matches!(
            f.ledger.get_choices(f.user_id, Some(4)).await,
            Err(AppError::InvalidPhaseFilter(4))
        ));
        let all = f.ledger.get_choices(f.user_id, None).await.unwrap();
        assert_eq!(all.total, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_choices_and_recommendations() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 20, &[Phase::One]).await;
        f.ledger.submit_batch(f.user_id, batch(&ids, "LIKE")).await.unwrap();
        f.store
            .replace_recommendations(
                f.user_id,
                vec![crate::models::Recommendation {
                    source_user_id: f.user_id,
                    target_user_id: Uuid::new_v4(),
                    similarity_score: 0.9,
                    rank: 1,
                    created_at: Utc::now(),
                }],
            )
            .await
            .unwrap();

        let outcome = f.ledger.reset_all(f.user_id).await.unwrap();

        assert_eq!(outcome.deleted_choices, 20);
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 0);
        assert!(f.store.list_recommendations(f.user_id, 10).await.unwrap().is_empty());
    }

    /// Delegates to the memory store but cannot reset
    struct ResetFailsStore(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl ChoiceStore for ResetFailsStore {
        async fn count_choices(&self, user_id: Uuid) -> AppResult<usize> {
            self.0.count_choices(user_id).await
        }

        async fn count_choices_in_phase(&self, user_id: Uuid, phase: Phase) -> AppResult<usize> {
            self.0.count_choices_in_phase(user_id, phase).await
        }

        async fn list_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<Vec<Choice>> {
            self.0.list_choices(user_id, phase).await
        }

        async fn has_choice(&self, user_id: Uuid, image_id: Uuid) -> AppResult<bool> {
            self.0.has_choice(user_id, image_id).await
        }

        async fn commit(&self, commit: ChoiceCommit) -> AppResult<()> {
            self.0.commit(commit).await
        }

        async fn delete_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<usize> {
            self.0.delete_choices(user_id, phase).await
        }

        async fn reset_user(&self, _user_id: Uuid) -> AppResult<usize> {
            Err(AppError::Internal("storage unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_reset_leaves_completed_user_intact() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 60, &Phase::ALL).await;
        let ledger = ChoiceLedger::new(
            f.store.clone(),
            f.store.clone(),
            Arc::new(ResetFailsStore(f.store.clone())),
        );
        for chunk in ids.chunks(20) {
            ledger.submit_batch(f.user_id, batch(chunk, "LIKE")).await.unwrap();
        }

        let result = ledger.reset_all(f.user_id).await;
        assert!(matches!(result, Err(AppError::Internal(_))));

        // nothing half-applied: all 60 choices and the COMPLETED status remain
        assert_eq!(f.store.count_choices(f.user_id).await.unwrap(), 60);
        let user = f.store.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Completed);
        assert!(ledger.get_progress(f.user_id).await.unwrap().all_completed);
    }

    #[tokio::test]
    async fn test_reset_reopens_a_completed_user() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 60, &Phase::ALL).await;
        for chunk in ids.chunks(20) {
            f.ledger.submit_batch(f.user_id, batch(chunk, "PASS")).await.unwrap();
        }

        f.ledger.reset_all(f.user_id).await.unwrap();

        let user = f.store.get_user(f.user_id).await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert!(f.ledger.submit_batch(f.user_id, batch(&ids[..20], "LIKE")).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_response_time_is_kept() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 20, &[Phase::One]).await;
        let items: Vec<BatchItem> = batch(&ids, "LIKE")
            .into_iter()
            .map(|item| BatchItem {
                response_time_ms: Some(0),
                ..item
            })
            .collect();

        f.ledger.submit_batch(f.user_id, items).await.unwrap();

        let history = f.ledger.get_choices(f.user_id, None).await.unwrap();
        assert_eq!(history.total, 20);
        assert!(history.choices.iter().all(|c| c.response_time_ms == Some(0)));
    }

    #[tokio::test]
    async fn test_concurrent_batches_for_one_user_do_not_interleave() {
        let f = fixture(UserStatus::Active).await;
        let ids = add_images(&f.store, 40, &[Phase::One, Phase::Two]).await;
        let user_id = f.user_id;
        let store = f.store.clone();
        let ledger = Arc::new(f.ledger);

        let first = {
            let ledger = ledger.clone();
            let items = batch(&ids[..20], "LIKE");
            tokio::spawn(async move { ledger.submit_batch(user_id, items).await })
        };
        let second = {
            let ledger = ledger.clone();
            let items = batch(&ids[20..], "LIKE");
            tokio::spawn(async move { ledger.submit_batch(user_id, items).await })
        };

        let (a, b) = (first.await.unwrap(), second.await.unwrap());
        assert!(a.is_ok() && b.is_ok());

        // Serialised: one batch filled phase 1, the other phase 2
        assert_eq!(store.count_choices_in_phase(user_id, Phase::One).await.unwrap(), 20);
        assert_eq!(store.count_choices_in_phase(user_id, Phase::Two).await.unwrap(), 20);
    }
}
