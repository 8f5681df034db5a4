//! Face embedding provider abstraction
//!
//! Embeddings are produced by an external vision service. The core only
//! stores and compares them, so the provider sits behind a trait that
//! tests replace with a mock.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::FaceEmbedding,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Detects the face in `image_url` and returns its embedding
    async fn embed(&self, image_url: &str) -> AppResult<FaceEmbedding>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    image_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
    confidence: f32,
    #[serde(default)]
    attributes: serde_json::Value,
}

/// Client for the vision sidecar's `POST /embed` endpoint
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    http_client: HttpClient,
    base_url: String,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: String, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, image_url: &str) -> AppResult<FaceEmbedding> {
        if image_url.trim().is_empty() {
            return Err(AppError::InvalidInput("image_url cannot be empty".to_string()));
        }

        let url = format!("{}/embed", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&EmbedRequest { image_url })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "embedding service returned status {}: {}",
                status, body
            )));
        }

        let body: EmbedResponse = response.json().await?;

        tracing::info!(
            image_url = %image_url,
            confidence = body.confidence,
            dimension = body.embedding.len(),
            provider = self.name(),
            "Embedding computed"
        );

        Ok(FaceEmbedding {
            embedding: body.embedding,
            confidence: body.confidence,
            attributes: body.attributes,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider =
            HttpEmbeddingProvider::new("http://vision.local/".to_string(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(provider.base_url, "http://vision.local");
    }

    #[test]
    fn test_response_attributes_default_to_null() {
        let body: EmbedResponse =
            serde_json::from_str(r#"{"embedding":[0.1,0.2],"confidence":0.93}"#).unwrap();
        assert_eq!(body.embedding.len(), 2);
        assert!(body.attributes.is_null());
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected_before_any_request() {
        let provider =
            HttpEmbeddingProvider::new("http://vision.local".to_string(), Duration::from_secs(1))
                .unwrap();
        let err = provider.embed("  ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
