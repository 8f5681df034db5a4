use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Action, Phase, EMBEDDING_DIM};

/// A pool image users vote on, with its stored face embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateImage {
    pub id: Uuid,
    pub image_url: String,
    pub person_code: Option<String>,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub confidence: f32,
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub active: bool,
    pub phase_eligibility: Vec<Phase>,
    pub usage_count: i64,
    pub like_count: i64,
    pub pass_count: i64,
    pub prefer_count: i64,
    pub created_at: DateTime<Utc>,
}

impl CandidateImage {
    pub fn is_eligible_for(&self, phase: Phase) -> bool {
        self.phase_eligibility.contains(&phase)
    }

    /// Whether the embedding can take part in similarity scoring
    pub fn has_usable_embedding(&self) -> bool {
        is_usable_embedding(&self.embedding)
    }

    /// Applies one committed vote to the usage counters
    pub fn record_vote(&mut self, action: Action) {
        self.usage_count += 1;
        match action {
            Action::Like => self.like_count += 1,
            Action::Pass => self.pass_count += 1,
            Action::Prefer => self.prefer_count += 1,
        }
    }
}

pub fn is_usable_embedding(embedding: &[f32]) -> bool {
    embedding.len() == EMBEDDING_DIM && embedding.iter().all(|x| x.is_finite())
}

/// Output of the external vision model for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub embedding: Vec<f32>,
    pub confidence: f32,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Request to add an image to the voting pool
#[derive(Debug, Clone, Deserialize)]
pub struct NewPoolImage {
    pub image_url: String,
    #[serde(default)]
    pub person_code: Option<String>,
    /// Defaults to every phase
    #[serde(default = "all_phases")]
    pub phases: Vec<Phase>,
}

fn all_phases() -> Vec<Phase> {
    Phase::ALL.to_vec()
}

impl CandidateImage {
    pub fn from_registration(request: NewPoolImage, face: FaceEmbedding) -> Self {
        let mut phases = request.phases;
        phases.sort();
        phases.dedup();

        Self {
            id: Uuid::new_v4(),
            image_url: request.image_url,
            person_code: request.person_code,
            embedding: face.embedding,
            confidence: face.confidence,
            attributes: face.attributes,
            active: true,
            phase_eligibility: phases,
            usage_count: 0,
            like_count: 0,
            pass_count: 0,
            prefer_count: 0,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> CandidateImage {
        CandidateImage::from_registration(
            NewPoolImage {
                image_url: "faces/p1.jpg".to_string(),
                person_code: Some("p1".to_string()),
                phases: vec![Phase::Two, Phase::One, Phase::Two],
            },
            FaceEmbedding {
                embedding: vec![0.1; EMBEDDING_DIM],
                confidence: 0.93,
                attributes: serde_json::Value::Null,
            },
        )
    }

    #[test]
    fn test_registration_dedups_phases() {
        let image = image();
        assert_eq!(image.phase_eligibility, vec![Phase::One, Phase::Two]);
        assert!(image.is_eligible_for(Phase::Two));
        assert!(!image.is_eligible_for(Phase::Three));
        assert!(image.active);
    }

    #[test]
    fn test_record_vote_bumps_counters() {
        let mut image = image();
        image.record_vote(Action::Like);
        image.record_vote(Action::Prefer);
        image.record_vote(Action::Pass);
        image.record_vote(Action::Like);
        assert_eq!(image.usage_count, 4);
        assert_eq!(image.like_count, 2);
        assert_eq!(image.pass_count, 1);
        assert_eq!(image.prefer_count, 1);
    }

    #[test]
    fn test_usable_embedding_requires_full_dimension() {
        assert!(is_usable_embedding(&vec![0.0; EMBEDDING_DIM]));
        assert!(!is_usable_embedding(&[]));
        assert!(!is_usable_embedding(&vec![0.5; 128]));

        let mut bad = vec![0.0; EMBEDDING_DIM];
        bad[3] = f32::NAN;
        assert!(!is_usable_embedding(&bad));
    }

    #[test]
    fn test_new_pool_image_defaults_to_all_phases() {
        let request: NewPoolImage =
            serde_json::from_str(r#"{"image_url":"faces/p2.jpg"}"#).unwrap();
        assert_eq!(request.phases, Phase::ALL.to_vec());
        assert_eq!(request.person_code, None);
    }
}
