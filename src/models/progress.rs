use serde::Serialize;
use uuid::Uuid;

use super::{Phase, CHOICES_PER_PHASE};

/// Where a user stands in the flow, derived purely from their choice count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Active { phase: Phase, position: u8 },
    Completed,
}

impl Stage {
    pub fn phase(self) -> Option<Phase> {
        match self {
            Stage::Active { phase, .. } => Some(phase),
            Stage::Completed => None,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Stage::Completed)
    }
}

/// Maps the number of choices already recorded to the slot of the next one.
///
/// This is the only place phase boundaries are computed; progress is never
/// stored, so callers must re-derive it from a live count.
pub fn phase_of(total_choices: usize) -> Stage {
    let phase = match total_choices / CHOICES_PER_PHASE {
        0 => Phase::One,
        1 => Phase::Two,
        2 => Phase::Three,
        _ => return Stage::Completed,
    };
    let position = (total_choices % CHOICES_PER_PHASE + 1) as u8;
    Stage::Active { phase, position }
}

/// Snapshot of a user's progress, recomputed on every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProgress {
    pub user_id: Uuid,
    /// Active phase number; stays at 3 once everything is completed
    pub current_phase: u8,
    /// "<choices in current phase>/20", or "20/20" once completed
    pub phase_progress: String,
    pub total_choices: usize,
    pub phase_counts: [usize; 3],
    pub phase_completed: [bool; 3],
    pub all_completed: bool,
    #[serde(skip)]
    pub stage: Stage,
}

impl UserProgress {
    pub fn from_counts(user_id: Uuid, phase_counts: [usize; 3]) -> Self {
        let total_choices: usize = phase_counts.iter().sum();
        let stage = phase_of(total_choices);

        let (current_phase, phase_progress) = match stage {
            Stage::Active { phase, .. } => (
                phase.number(),
                format!("{}/{}", phase_counts[phase.index()], CHOICES_PER_PHASE),
            ),
            Stage::Completed => (
                Phase::Three.number(),
                format!("{}/{}", CHOICES_PER_PHASE, CHOICES_PER_PHASE),
            ),
        };

        Self {
            user_id,
            current_phase,
            phase_progress,
            total_choices,
            phase_counts,
            phase_completed: phase_counts.map(|count| count >= CHOICES_PER_PHASE),
            all_completed: stage.is_completed(),
            stage,
        }
    }
}
