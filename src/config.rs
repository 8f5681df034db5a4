use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Base URL of the face embedding service
    #[serde(default = "default_embedding_service_url")]
    pub embedding_service_url: String,

    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,

    /// Detector confidence below which an uploaded face is rejected
    #[serde(default = "default_min_face_confidence")]
    pub min_face_confidence: f32,

    #[serde(default = "default_recommendation_limit")]
    pub default_recommendation_limit: usize,

    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f32,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_embedding_service_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_min_face_confidence() -> f32 {
    0.7
}

fn default_recommendation_limit() -> usize {
    10
}

fn default_min_similarity() -> f32 {
    0.5
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
