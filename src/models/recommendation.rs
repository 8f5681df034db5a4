use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A candidate user scored against a preference vector, before persistence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub user_id: Uuid,
    pub similarity_score: f32,
}

/// A persisted recommendation row; rank 1 is the best match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub source_user_id: Uuid,
    pub target_user_id: Uuid,
    pub similarity_score: f32,
    pub rank: u32,
    pub created_at: DateTime<Utc>,
}
