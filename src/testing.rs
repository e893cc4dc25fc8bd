//! Test doubles shared by unit tests across modules.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use crate::embeddings::EmbeddingProvider;
use crate::extract::video::VideoTranscript;
use crate::extract::{ExtractorRegistry, PageRenderer, TranscriptSource};
use crate::{GranthError, Result};

pub(crate) const DIMENSION: usize = 32;

/// Bag-of-words embeddings: each lowercase word bumps one bucket
pub(crate) fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
    {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(2_166_136_261_u32, |hash, byte| {
                (hash ^ u32::from(byte)).wrapping_mul(16_777_619)
            });
        if let Some(slot) = vector.get_mut(hash as usize % DIMENSION) {
            *slot += 1.0;
        }
    }
    vector
}

#[derive(Default)]
pub(crate) struct HashEmbeddings {
    pub calls: AtomicUsize,
    /// Fail every call after this many successful ones
    pub fail_after: Option<usize>,
}

impl HashEmbeddings {
    pub(crate) fn failing_after(calls: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: Some(calls),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(GranthError::EmbeddingService(
                "simulated embedding outage".to_string(),
            ));
        }
        Ok(hash_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(GranthError::EmbeddingService(
                "simulated embedding outage".to_string(),
            ));
        }
        Ok(texts.iter().map(|text| hash_embedding(text)).collect())
    }

    fn model(&self) -> &str {
        "hash-test"
    }
}

pub(crate) struct UnreachableRenderer;

#[async_trait]
impl PageRenderer for UnreachableRenderer {
    async fn render(&self, url: &Url) -> Result<String> {
        Err(GranthError::Extraction(format!("no browser in tests: {url}")))
    }
}

pub(crate) struct NoTranscripts;

#[async_trait]
impl TranscriptSource for NoTranscripts {
    async fn fetch_transcript(&self, url: &Url) -> Result<VideoTranscript> {
        Err(GranthError::TranscriptUnavailable(url.to_string()))
    }
}

/// Registry that handles text, files and tabular data but no network inputs
pub(crate) fn offline_registry() -> ExtractorRegistry {
    ExtractorRegistry::new(Arc::new(UnreachableRenderer), Arc::new(NoTranscripts))
}

/// Prose of roughly `words` words with no repeated sentence
pub(crate) fn prose(words: usize) -> String {
    (0..words)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .chunks(12)
        .map(|sentence| format!("{}.", sentence.join(" ")))
        .collect::<Vec<_>>()
        .join(" ")
}
