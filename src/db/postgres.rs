use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::{ChoiceCommit, ChoiceStore, ImageCatalog, RecommendationStore, UserStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        Action, CandidateFace, CandidateImage, Choice, Phase, PrimaryImage, Recommendation, User,
        UserStatus,
    },
};

const UNIQUE_USER_POOL_IMAGE: &str = "unique_user_pool_image";

/// Creates a PostgreSQL connection pool and applies pending migrations
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// PostgreSQL implementation of every storage port
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PoolImageRow {
    id: Uuid,
    image_url: String,
    person_code: Option<String>,
    face_embedding: Vec<f32>,
    face_confidence: f32,
    facial_attributes: serde_json::Value,
    phase_eligibility: Vec<i16>,
    usage_count: i64,
    like_count: i64,
    pass_count: i64,
    prefer_count: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
}

const POOL_IMAGE_COLUMNS: &str = "id, image_url, person_code, face_embedding, face_confidence, \
     facial_attributes, phase_eligibility, usage_count, like_count, pass_count, prefer_count, \
     is_active, created_at";

impl TryFrom<PoolImageRow> for CandidateImage {
    type Error = AppError;

    fn try_from(row: PoolImageRow) -> Result<Self, Self::Error> {
        let phase_eligibility = row
            .phase_eligibility
            .into_iter()
            .map(phase_from_column)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(CandidateImage {
            id: row.id,
            image_url: row.image_url,
            person_code: row.person_code,
            embedding: row.face_embedding,
            confidence: row.face_confidence,
            attributes: row.facial_attributes,
            active: row.is_active,
            phase_eligibility,
            usage_count: row.usage_count,
            like_count: row.like_count,
            pass_count: row.pass_count,
            prefer_count: row.prefer_count,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChoiceRow {
    id: Uuid,
    user_id: Uuid,
    pool_image_id: Uuid,
    phase: i16,
    position_in_phase: i16,
    action: String,
    response_time_ms: Option<i32>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChoiceRow> for Choice {
    type Error = AppError;

    fn try_from(row: ChoiceRow) -> Result<Self, Self::Error> {
        let action: Action = row.action.parse()?;
        let position = u8::try_from(row.position_in_phase)
            .map_err(|_| AppError::Internal(format!("bad position {}", row.position_in_phase)))?;

        Ok(Choice {
            id: row.id,
            user_id: row.user_id,
            image_id: row.pool_image_id,
            phase: phase_from_column(row.phase)?,
            position,
            action,
            response_time_ms: row.response_time_ms.and_then(|ms| u32::try_from(ms).ok()),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    image_url: Option<String>,
    face_embedding: Option<Vec<f32>>,
    face_confidence: Option<f32>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<UserStatus>().map_err(AppError::Internal)?;
        let primary_image = match (row.image_url, row.face_embedding, row.face_confidence) {
            (Some(image_url), Some(embedding), Some(confidence)) => Some(PrimaryImage {
                image_url,
                embedding,
                confidence,
            }),
            _ => None,
        };

        Ok(User {
            id: row.id,
            name: row.name,
            status,
            primary_image,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    user_id: Uuid,
    recommended_user_id: Uuid,
    similarity_score: f32,
    rank: i32,
    created_at: DateTime<Utc>,
}

impl From<RecommendationRow> for Recommendation {
    fn from(row: RecommendationRow) -> Self {
        Recommendation {
            source_user_id: row.user_id,
            target_user_id: row.recommended_user_id,
            similarity_score: row.similarity_score,
            rank: row.rank.max(1) as u32,
            created_at: row.created_at,
        }
    }
}

fn phase_from_column(value: i16) -> AppResult<Phase> {
    u8::try_from(value)
        .ok()
        .and_then(|n| Phase::try_from(n).ok())
        .ok_or_else(|| AppError::Internal(format!("bad phase {} in database", value)))
}

fn phase_column(phase: Phase) -> i16 {
    phase.number() as i16
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait]
impl ImageCatalog for PgStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CandidateImage>> {
        let sql = format!("SELECT {} FROM pool_images WHERE id = $1", POOL_IMAGE_COLUMNS);
        let row = sqlx::query_as::<_, PoolImageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CandidateImage::try_from).transpose()
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<CandidateImage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {} FROM pool_images WHERE id = ANY($1)", POOL_IMAGE_COLUMNS);
        let rows = sqlx::query_as::<_, PoolImageRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CandidateImage::try_from).collect()
    }

    async fn find_by_url(&self, image_url: &str) -> AppResult<Option<CandidateImage>> {
        let sql = format!("SELECT {} FROM pool_images WHERE image_url = $1", POOL_IMAGE_COLUMNS);
        let row = sqlx::query_as::<_, PoolImageRow>(&sql)
            .bind(image_url)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CandidateImage::try_from).transpose()
    }

    async fn find_eligible_images(
        &self,
        phase: Phase,
        exclude: &HashSet<Uuid>,
    ) -> AppResult<Vec<CandidateImage>> {
        let excluded: Vec<Uuid> = exclude.iter().copied().collect();
        let sql = format!(
            r#"
            SELECT {}
            FROM pool_images
            WHERE is_active = true
              AND $1 = ANY(phase_eligibility)
              AND NOT (id = ANY($2))
            ORDER BY id
            "#,
            POOL_IMAGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, PoolImageRow>(&sql)
            .bind(phase_column(phase))
            .bind(&excluded)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CandidateImage::try_from).collect()
    }

    async fn insert_image(&self, image: CandidateImage) -> AppResult<()> {
        let phases: Vec<i16> = image.phase_eligibility.iter().copied().map(phase_column).collect();

        sqlx::query(
            r#"
            INSERT INTO pool_images (
                id, image_url, person_code, face_embedding, face_confidence,
                facial_attributes, phase_eligibility, is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(image.id)
        .bind(&image.image_url)
        .bind(&image.person_code)
        .bind(&image.embedding)
        .bind(image.confidence)
        .bind(&image.attributes)
        .bind(&phases)
        .bind(image.active)
        .bind(image.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, "pool_images_image_url_key") {
                AppError::ImageAlreadyRegistered(image.image_url.clone())
            } else {
                AppError::from(e)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl ChoiceStore for PgStore {
    async fn count_choices(&self, user_id: Uuid) -> AppResult<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_choices WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn count_choices_in_phase(&self, user_id: Uuid, phase: Phase) -> AppResult<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_choices WHERE user_id = $1 AND phase = $2")
                .bind(user_id)
                .bind(phase_column(phase))
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn list_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<Vec<Choice>> {
        let rows = sqlx::query_as::<_, ChoiceRow>(
            r#"
            SELECT id, user_id, pool_image_id, phase, position_in_phase, action,
                   response_time_ms, created_at
            FROM user_choices
            WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR phase = $2)
            ORDER BY created_at, phase, position_in_phase
            "#,
        )
        .bind(user_id)
        .bind(phase.map(phase_column))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Choice::try_from).collect()
    }

    async fn has_choice(&self, user_id: Uuid, image_id: Uuid) -> AppResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM user_choices WHERE user_id = $1 AND pool_image_id = $2)",
        )
        .bind(user_id)
        .bind(image_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn commit(&self, commit: ChoiceCommit) -> AppResult<()> {
        let user_id = commit.user_id;
        let mut tx = self.pool.begin().await?;

        // Row lock serialises writers for this user across processes
        let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(AppError::UserNotFound(user_id));
        }

        let (live_total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_choices WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
        if live_total as usize != commit.expected_total {
            return Err(AppError::ConcurrentSubmission(user_id));
        }

        if let Some(phase) = commit.replace_phase {
            sqlx::query("DELETE FROM user_choices WHERE user_id = $1 AND phase = $2")
                .bind(user_id)
                .bind(phase_column(phase))
                .execute(&mut *tx)
                .await?;
        }

        for choice in &commit.choices {
            sqlx::query(
                r#"
                INSERT INTO user_choices (
                    id, user_id, pool_image_id, phase, position_in_phase, action,
                    response_time_ms, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(choice.id)
            .bind(choice.user_id)
            .bind(choice.image_id)
            .bind(phase_column(choice.phase))
            .bind(choice.position as i16)
            .bind(choice.action.as_str())
            .bind(choice.response_time_ms.map(|ms| ms.min(i32::MAX as u32) as i32))
            .bind(choice.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e, UNIQUE_USER_POOL_IMAGE) {
                    AppError::DuplicateVote(choice.image_id)
                } else {
                    AppError::from(e)
                }
            })?;

            sqlx::query(
                r#"
                UPDATE pool_images SET
                    usage_count = usage_count + 1,
                    like_count = like_count + CASE WHEN $2 = 'LIKE' THEN 1 ELSE 0 END,
                    pass_count = pass_count + CASE WHEN $2 = 'PASS' THEN 1 ELSE 0 END,
                    prefer_count = prefer_count + CASE WHEN $2 = 'PREFER' THEN 1 ELSE 0 END
                WHERE id = $1
                "#,
            )
            .bind(choice.image_id)
            .bind(choice.action.as_str())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(status) = commit.status_after {
            set_status_in(&mut tx, user_id, status).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_choices(&self, user_id: Uuid, phase: Option<Phase>) -> AppResult<usize> {
        let result = sqlx::query(
            "DELETE FROM user_choices WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR phase = $2)",
        )
        .bind(user_id)
        .bind(phase.map(phase_column))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn reset_user(&self, user_id: Uuid) -> AppResult<usize> {
        let mut tx = self.pool.begin().await?;

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((status,)) = status else {
            return Err(AppError::UserNotFound(user_id));
        };

        let deleted = sqlx::query("DELETE FROM user_choices WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM recommendations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if status == UserStatus::Completed.as_str() {
            set_status_in(&mut tx, user_id, UserStatus::Active).await?;
        }

        tx.commit().await?;
        Ok(deleted as usize)
    }
}

async fn set_status_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    status: UserStatus,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE users SET
            status = $2,
            completed_at = CASE WHEN $2 = 'COMPLETED' THEN now() ELSE NULL END
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(status.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.name, u.status, u.created_at, u.completed_at,
                   ui.image_url, ui.face_embedding, ui.face_confidence
            FROM users u
            LEFT JOIN user_images ui ON ui.user_id = u.id AND ui.is_primary
            WHERE u.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn insert_user(&self, user: User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, status, created_at, completed_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.status.as_str())
        .bind(user.created_at)
        .bind(user.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: UserStatus) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        set_status_in(&mut tx, id, status).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_primary_image(&self, id: Uuid, image: PrimaryImage) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::UserNotFound(id));
        }

        sqlx::query("UPDATE user_images SET is_primary = false WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_images (id, user_id, image_url, face_embedding, face_confidence, is_primary)
            VALUES ($1, $2, $3, $4, $5, true)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(&image.image_url)
        .bind(&image.embedding)
        .bind(image.confidence)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_candidates(&self, exclude: Uuid) -> AppResult<Vec<CandidateFace>> {
        let rows: Vec<(Uuid, Vec<f32>)> = sqlx::query_as(
            r#"
            SELECT user_id, face_embedding
            FROM user_images
            WHERE is_primary AND user_id <> $1
            ORDER BY user_id
            "#,
        )
        .bind(exclude)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, embedding)| CandidateFace { user_id, embedding })
            .collect())
    }
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn replace_recommendations(
        &self,
        user_id: Uuid,
        recommendations: Vec<Recommendation>,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM recommendations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for recommendation in &recommendations {
            sqlx::query(
                r#"
                INSERT INTO recommendations (user_id, recommended_user_id, similarity_score, rank, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(user_id)
            .bind(recommendation.target_user_id)
            .bind(recommendation.similarity_score)
            .bind(recommendation.rank as i32)
            .bind(recommendation.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_recommendations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<Recommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(
            r#"
            SELECT user_id, recommended_user_id, similarity_score, rank, created_at
            FROM recommendations
            WHERE user_id = $1
            ORDER BY rank
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Recommendation::from).collect())
    }
}
