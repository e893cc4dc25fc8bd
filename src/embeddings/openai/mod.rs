//! Embeddings over the OpenAI-compatible `/v1/embeddings` endpoint.


use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::http::{self, RetryPolicy};
use crate::{GranthError, Result};

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    base_url: Url,
    api_key: String,
    model: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiEmbeddingClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Create a client, reading the API key from the configured environment variable
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            GranthError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    #[inline]
    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GranthError::Config("API key must not be empty".to_string()));
        }

        let base_url = config
            .endpoint_url()
            .map_err(|e| GranthError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key,
            model: config.model.clone(),
            agent: http::agent(Duration::from_secs(http::DEFAULT_TIMEOUT_SECONDS)),
            retry: RetryPolicy::default(),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    #[inline]
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from {} with {}",
            texts.len(),
            self.base_url,
            self.model
        );

        let url = http::endpoint(&self.base_url, "v1/embeddings")
            .context("Failed to build embeddings URL")?;
        let request_json = serde_json::to_string(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embeddings request")?;
        let authorization = format!("Bearer {}", self.api_key);

        let response_text = http::with_retry(&self.retry, "embeddings API", || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &authorization)
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|failure| failure.into_error(GranthError::EmbeddingService))?;

        let mut response: EmbeddingResponse = serde_json::from_str(&response_text).map_err(|e| {
            GranthError::EmbeddingService(format!("Failed to parse embeddings response: {e}"))
        })?;

        if response.data.len() != texts.len() {
            return Err(GranthError::EmbeddingService(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|data| data.index);
        Ok(response.data.into_iter().map(|data| data.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GranthError::EmbeddingService("Empty embeddings response".to_string()))
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_blocking(&texts))
            .await
            .map_err(|e| GranthError::EmbeddingService(format!("Embedding task failed: {e}")))?
    }

    #[inline]
    fn model(&self) -> &str {
        &self.model
    }
}
