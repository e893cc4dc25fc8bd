#[cfg(test)]
mod tests;

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

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config
            .endpoint_url()
            .map_err(|e| GranthError::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            agent: http::agent(Duration::from_secs(http::DEFAULT_TIMEOUT_SECONDS)),
            retry: RetryPolicy::default(),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = http::agent(timeout);
        self
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

    /// Embed a batch of texts with one `/api/embed` call
    #[inline]
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Generating embeddings for {} texts with {}",
            texts.len(),
            self.model
        );

        let url = http::endpoint(&self.base_url, "api/embed")
            .context("Failed to build embedding URL")?;

        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = http::with_retry(&self.retry, "Ollama", || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|failure| failure.into_error(GranthError::EmbeddingService))?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            GranthError::EmbeddingService(format!("Failed to parse embedding response: {e}"))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(GranthError::EmbeddingService(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        debug!(
            "Generated {} embeddings with {} dimensions",
            response.embeddings.len(),
            response.embeddings.first().map_or(0, Vec::len)
        );
        Ok(response.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GranthError::EmbeddingService("Empty embedding response".to_string()))
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
