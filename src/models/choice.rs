use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Action, Phase};

/// An immutable vote by a user on one pool image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub image_id: Uuid,
    pub phase: Phase,
    /// 1..=20 within the phase
    pub position: u8,
    pub action: Action,
    pub response_time_ms: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Choice {
    pub fn new(
        user_id: Uuid,
        image_id: Uuid,
        phase: Phase,
        position: u8,
        action: Action,
        response_time_ms: Option<u32>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            image_id,
            phase,
            position,
            action,
            response_time_ms,
            created_at,
        }
    }
}

/// One entry of a batch submission, as received from the client.
///
/// The action stays a raw string so that an invalid value can be reported
/// with its position after the image checks have run.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    pub image_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub response_time_ms: Option<u32>,
}

/// LIKE/PASS/PREFER counts over a set of choices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionTally {
    pub likes: usize,
    pub passes: usize,
    pub prefers: usize,
}

impl ActionTally {
    pub fn record(&mut self, action: Action) {
        match action {
            Action::Like => self.likes += 1,
            Action::Pass => self.passes += 1,
            Action::Prefer => self.prefers += 1,
        }
    }
}

impl<'a> FromIterator<&'a Choice> for ActionTally {
    fn from_iter<I: IntoIterator<Item = &'a Choice>>(iter: I) -> Self {
        let mut tally = ActionTally::default();
        for choice in iter {
            tally.record(choice.action);
        }
        tally
    }
}
