pub mod catalog;
pub mod embedding;
pub mod ledger;
pub mod profile;
pub mod ranker;
pub mod selector;
pub mod similarity;

pub use catalog::CatalogService;
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use ledger::ChoiceLedger;
pub use profile::PreferenceProfileBuilder;
pub use ranker::RecommendationRanker;
pub use selector::PhaseSelector;
