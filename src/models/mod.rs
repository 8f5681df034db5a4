use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use crate::error::AppError;

pub mod choice;
pub mod image;
pub mod profile;
pub mod progress;
pub mod recommendation;
pub mod user;

pub use choice::{ActionTally, BatchItem, Choice};
pub use image::{is_usable_embedding, CandidateImage, FaceEmbedding, NewPoolImage};
pub use profile::PreferenceProfile;
pub use progress::{phase_of, Stage, UserProgress};
pub use recommendation::{RankedCandidate, Recommendation};
pub use user::{CandidateFace, PrimaryImage, User, UserStatus};

/// Length of every face embedding produced by the vision model
pub const EMBEDDING_DIM: usize = 512;

/// Number of choices that make up one phase
pub const CHOICES_PER_PHASE: usize = 20;

/// Choices needed to finish the whole flow
pub const TOTAL_CHOICES: usize = CHOICES_PER_PHASE * 3;

/// One of the three sequential rounds of the preference flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    /// Random exploration
    One,
    /// Similarity refinement from phase-1 likes
    Two,
    /// Fine-tuning from phase-1 and phase-2 likes
    Three,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::One, Phase::Two, Phase::Three];

    pub fn number(self) -> u8 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
            Phase::Three => 3,
        }
    }

    /// Zero-based index, for per-phase arrays
    pub fn index(self) -> usize {
        self.number() as usize - 1
    }

    /// Parses a user-supplied phase filter
    pub fn from_filter(value: i64) -> Result<Self, AppError> {
        u8::try_from(value)
            .ok()
            .and_then(|n| Phase::try_from(n).ok())
            .ok_or(AppError::InvalidPhaseFilter(value))
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::One),
            2 => Ok(Phase::Two),
            3 => Ok(Phase::Three),
            other => Err(format!("phase must be 1, 2, or 3, got {}", other)),
        }
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.number()
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A user's reaction to one candidate image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Like,
    Pass,
    Prefer,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Like => "LIKE",
            Action::Pass => "PASS",
            Action::Prefer => "PREFER",
        }
    }

    /// LIKE and PREFER both count as positive preference signal
    pub fn is_favorable(self) -> bool {
        matches!(self, Action::Like | Action::Prefer)
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIKE" => Ok(Action::Like),
            "PASS" => Ok(Action::Pass),
            "PREFER" => Ok(Action::Prefer),
            _ => Err(AppError::InvalidAction {
                position: None,
                value: s.to_string(),
            }),
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serde_as_number() {
        let json = serde_json::to_string(&Phase::Two).unwrap();
        assert_eq!(json, "2");

        let phase: Phase = serde_json::from_str("3").unwrap();
        assert_eq!(phase, Phase::Three);
        assert!(serde_json::from_str::<Phase>("4").is_err());
    }

    #[test]
    fn test_phase_filter_rejects_out_of_range() {
        assert_eq!(Phase::from_filter(1).unwrap(), Phase::One);
        assert!(matches!(
            Phase::from_filter(0),
            Err(AppError::InvalidPhaseFilter(0))
        ));
        assert!(matches!(
            Phase::from_filter(300),
            Err(AppError::InvalidPhaseFilter(300))
        ));
    }

    #[test]
    fn test_action_parse_is_case_insensitive() {
        assert_eq!("like".parse::<Action>().unwrap(), Action::Like);
        assert_eq!("Prefer".parse::<Action>().unwrap(), Action::Prefer);
        assert_eq!("PASS".parse::<Action>().unwrap(), Action::Pass);
    }

    #[test]
    fn test_action_parse_rejects_unknown() {
        let err = "MAYBE".parse::<Action>().unwrap_err();
        assert!(matches!(err, AppError::InvalidAction { value, .. } if value == "MAYBE"));
    }

    #[test]
    fn test_favorable_actions() {
        assert!(Action::Like.is_favorable());
        assert!(Action::Prefer.is_favorable());
        assert!(!Action::Pass.is_favorable());
    }
}
