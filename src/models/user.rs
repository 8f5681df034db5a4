use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use uuid::Uuid;

/// Lifecycle state of a user in the preference flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Onboarding,
    Active,
    Completed,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Onboarding => "ONBOARDING",
            UserStatus::Active => "ACTIVE",
            UserStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONBOARDING" => Ok(UserStatus::Onboarding),
            "ACTIVE" => Ok(UserStatus::Active),
            "COMPLETED" => Ok(UserStatus::Completed),
            other => Err(format!("unknown user status '{}'", other)),
        }
    }
}

impl Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The user's own photo, scored against other users' learned preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryImage {
    pub image_url: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub status: UserStatus,
    pub primary_image: Option<PrimaryImage>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(name: Option<String>, status: UserStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status,
            primary_image: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Another user's primary-image embedding, as seen by the ranker
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFace {
    pub user_id: Uuid,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [UserStatus::Onboarding, UserStatus::Active, UserStatus::Completed] {
            assert_eq!(status.as_str().parse::<UserStatus>().unwrap(), status);
        }
        assert!("RETIRED".parse::<UserStatus>().is_err());
    }

    #[test]
    fn test_new_user_has_no_primary_image() {
        let user = User::new(Some("Ana".to_string()), UserStatus::Active);
        assert!(user.primary_image.is_none());
        assert!(user.completed_at.is_none());
    }
}
