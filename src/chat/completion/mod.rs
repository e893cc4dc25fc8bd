//! Chat completions over the OpenAI-compatible `/v1/chat/completions` endpoint.


use anyhow::Context;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::config::GenerationConfig;
use crate::http::{self, RetryPolicy};
use crate::{GranthError, Result};

/// Deltas buffered between the reader thread and the consumer
const STREAM_BUFFER: usize = 64;

/// Ordered text deltas; an `Err` item ends the stream
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
}

/// A language model that answers chat messages
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Full completion text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Completion text as it is produced
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TokenStream>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    #[serde(flatten)]
    request: &'a CompletionRequest,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: Option<String>,
}

/// One parsed server-sent event line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Interpret a single line of a chat completions event stream
pub(crate) fn parse_sse_line(line: &str) -> Result<SseEvent> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        GranthError::GenerationService(format!("Malformed stream event: {e}"))
    })?;

    if let Some(error) = chunk.error {
        return Err(GranthError::GenerationService(
            error
                .message
                .unwrap_or_else(|| "Provider reported a stream error".to_string()),
        ));
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    if delta.is_empty() {
        Ok(SseEvent::Skip)
    } else {
        Ok(SseEvent::Delta(delta))
    }
}

/// Forward deltas from an event stream until `[DONE]`, an error or a closed receiver
pub(crate) fn pump_events<R: Read>(reader: R, sender: &mpsc::Sender<Result<String>>) {
    let mut delivered = 0_usize;

    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = sender.blocking_send(Err(GranthError::GenerationService(format!(
                    "Completion stream interrupted: {e}"
                ))));
                return;
            }
        };

        match parse_sse_line(&line) {
            Ok(SseEvent::Delta(delta)) => {
                if sender.blocking_send(Ok(delta)).is_err() {
                    debug!("Token receiver dropped after {} deltas", delivered);
                    return;
                }
                delivered += 1;
            }
            Ok(SseEvent::Done) => {
                debug!("Completion stream finished after {} deltas", delivered);
                return;
            }
            Ok(SseEvent::Skip) => {}
            Err(e) => {
                let _ = sender.blocking_send(Err(e));
                return;
            }
        }
    }

    let _ = sender.blocking_send(Err(GranthError::GenerationService(
        "Completion stream ended before the provider signalled completion".to_string(),
    )));
}

/// Adapt a channel receiver into a [`TokenStream`]
pub(crate) fn receiver_stream(receiver: mpsc::Receiver<Result<String>>) -> TokenStream {
    Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    }))
}

#[derive(Clone)]
pub struct ChatCompletionsClient {
    base_url: Url,
    api_key: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ChatCompletionsClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsClient {
    /// Create a client, reading the API key from the configured environment variable
    #[inline]
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            GranthError::Config(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    #[inline]
    pub fn with_api_key(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
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
            agent: http::agent(Duration::from_secs(config.timeout_seconds)),
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

    fn completions_url(&self) -> Result<Url> {
        Ok(http::endpoint(&self.base_url, "v1/chat/completions")
            .context("Failed to build chat completions URL")?)
    }

    fn send(
        &self,
        url: &Url,
        body: &str,
    ) -> std::result::Result<ureq::http::Response<ureq::Body>, GranthError> {
        let authorization = format!("Bearer {}", self.api_key);
        http::with_retry(&self.retry, "chat completions API", || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &authorization)
                .send(body)
        })
        .map_err(|failure| failure.into_error(GranthError::GenerationService))
    }

    #[inline]
    pub fn complete_blocking(&self, request: &CompletionRequest) -> Result<String> {
        debug!(
            "Requesting completion from {} with {}",
            self.base_url, request.model
        );

        let url = self.completions_url()?;
        let body = serde_json::to_string(&WireRequest {
            request,
            stream: false,
        })
        .context("Failed to serialize completion request")?;

        let response_text = self
            .send(&url, &body)?
            .body_mut()
            .read_to_string()
            .map_err(|e| {
                GranthError::GenerationService(format!("Failed to read completion response: {e}"))
            })?;

        let response: CompletionResponse = serde_json::from_str(&response_text).map_err(|e| {
            GranthError::GenerationService(format!("Failed to parse completion response: {e}"))
        })?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default())
    }

    /// Open a streaming completion and forward deltas into `sender` from the calling thread
    fn stream_blocking(&self, request: &CompletionRequest, sender: &mpsc::Sender<Result<String>>) {
        let prepared = self.completions_url().and_then(|url| {
            let body = serde_json::to_string(&WireRequest {
                request,
                stream: true,
            })
            .context("Failed to serialize completion request")?;
            Ok((url, body))
        });
        let (url, body) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = sender.blocking_send(Err(e));
                return;
            }
        };

        match self.send(&url, &body) {
            Ok(response) => pump_events(response.into_body().into_reader(), sender),
            Err(e) => {
                warn!("Streaming completion request failed: {}", e);
                let _ = sender.blocking_send(Err(e));
            }
        }
    }
}

#[async_trait]
impl GenerationProvider for ChatCompletionsClient {
    #[inline]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let client = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || client.complete_blocking(&request))
            .await
            .map_err(|e| GranthError::GenerationService(format!("Completion task failed: {e}")))?
    }

    #[inline]
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let client = self.clone();
        let request = request.clone();
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);

        tokio::task::spawn_blocking(move || client.stream_blocking(&request, &sender));

        Ok(receiver_stream(receiver))
    }
}
