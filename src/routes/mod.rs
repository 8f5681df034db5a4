use axum::{
    http::StatusCode,
    middleware::from_fn,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config,
    db::{ChoiceStore, ImageCatalog, RecommendationStore, UserStore},
    middleware::{make_span_with_request_id, request_id_middleware},
    services::{
        CatalogService, ChoiceLedger, EmbeddingProvider, PhaseSelector, PreferenceProfileBuilder,
        RecommendationRanker,
    },
};

pub mod choices;
pub mod images;
pub mod recommendations;
pub mod users;

/// Knobs the handlers fall back to when a request leaves them out
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub min_face_confidence: f32,
    pub default_recommendation_limit: usize,
    pub default_min_similarity: f32,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            min_face_confidence: config.min_face_confidence,
            default_recommendation_limit: config.default_recommendation_limit,
            default_min_similarity: config.default_min_similarity,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub ledger: Arc<ChoiceLedger>,
    pub selector: PhaseSelector,
    pub profiles: Arc<PreferenceProfileBuilder>,
    pub ranker: RecommendationRanker,
    pub catalog: CatalogService,
    pub settings: ServiceSettings,
}

impl AppState {
    /// Wires every service onto one store implementing all four ports
    pub fn new<S>(store: Arc<S>, embedder: Arc<dyn EmbeddingProvider>, settings: ServiceSettings) -> Self
    where
        S: ImageCatalog + ChoiceStore + UserStore + RecommendationStore + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let images: Arc<dyn ImageCatalog> = store.clone();
        let choices: Arc<dyn ChoiceStore> = store.clone();
        let recommendations: Arc<dyn RecommendationStore> = store;

        let ledger = Arc::new(ChoiceLedger::new(
            users.clone(),
            images.clone(),
            choices.clone(),
        ));
        let profiles = Arc::new(PreferenceProfileBuilder::new(
            users.clone(),
            images.clone(),
            choices,
        ));

        Self {
            selector: PhaseSelector::new(ledger.clone(), images.clone()),
            ranker: RecommendationRanker::new(profiles.clone(), users.clone(), recommendations),
            catalog: CatalogService::new(users, images, embedder, settings.min_face_confidence),
            ledger,
            profiles,
            settings,
        }
    }
}

/// Creates the application router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(from_fn(request_id_middleware))
}

/// API routes under /api/v1
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(users::register))
        .route("/users/me/primary-image", put(users::set_primary_image))
        .route("/pool-images", post(images::register))
        .route("/pool-images/phase/:phase", get(images::list_for_phase))
        .route("/choices/images", get(choices::images))
        .route(
            "/choices",
            post(choices::submit_single)
                .get(choices::history)
                .delete(choices::reset),
        )
        .route("/choices/batch", post(choices::submit_batch))
        .route("/choices/progress", get(choices::progress))
        .route("/recommendations", get(recommendations::saved))
        .route("/recommendations/profile", get(recommendations::profile))
        .route("/recommendations/generate", post(recommendations::generate))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
