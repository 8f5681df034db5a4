use serde::Serialize;
use uuid::Uuid;

/// A completed user's learned preference in embedding space
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceProfile {
    pub user_id: Uuid,
    /// Unit-length weighted average of favoured embeddings
    pub preference_vector: Vec<f32>,
    pub vector_dimension: usize,
    pub total_choices: usize,
    /// LIKE and PREFER choices together
    pub total_likes: usize,
    pub total_passes: usize,
    pub total_prefers: usize,
    /// LIKE+PREFER count per phase
    pub phase_likes: [usize; 3],
    /// Mean weight of the choices that contributed to the vector
    pub preference_strength: f32,
}
