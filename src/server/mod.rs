//! HTTP surface for indexing inputs and asking questions.
//!
//! Every route answers with a `{ "success": bool, ... }` envelope. Input
//! problems map to `400`, exhausted provider retries to `503` and everything
//! else to `500`.


use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chat::{ChatService, GenerationProvider};
use crate::config::{Config, ServerConfig};
use crate::database::VectorStore;
use crate::embeddings::EmbeddingProvider;
use crate::extract::InputDescriptor;
use crate::indexer::{IndexReceipt, Indexer};
use crate::retriever::Retriever;
use crate::{GranthError, Result};

/// Largest request body accepted, uploads included
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Multipart field carrying the uploaded file
const UPLOAD_FIELD: &str = "file";

/// Services shared by every request
#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<Indexer>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    #[inline]
    pub fn new(indexer: Indexer, chat: ChatService) -> Self {
        Self {
            indexer: Arc::new(indexer),
            chat: Arc::new(chat),
        }
    }

    /// Wire the indexer and chat service to the same embedding model and store
    #[inline]
    pub fn from_config(
        config: &Config,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let indexer = Indexer::from_config(config, Arc::clone(&embeddings), Arc::clone(&store));
        let retriever = Retriever::from_config(config, embeddings, store);
        let chat = ChatService::from_config(config, retriever, generator);
        Self::new(indexer, chat)
    }
}

/// Error envelope returned by every route
#[derive(Debug)]
pub struct ApiError(GranthError);

impl ApiError {
    #[inline]
    pub fn status(&self) -> StatusCode {
        if self.0.is_input_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<GranthError> for ApiError {
    #[inline]
    fn from(error: GranthError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    #[inline]
    fn from(rejection: JsonRejection) -> Self {
        Self(GranthError::UnsupportedInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Rejected request: {}", self.0);
        }

        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(flatten)]
    pub receipt: IndexReceipt,
}

impl IndexResponse {
    fn indexed(message: &'static str, receipt: IndexReceipt) -> Self {
        Self {
            success: true,
            message,
            receipt,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
}

/// Build the application router
#[inline]
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/index/upload", post(upload))
        .route("/api/index/url-or-text", post(index_input))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the router until Ctrl-C
#[inline]
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("granthX server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server terminated unexpectedly")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Persist uploaded bytes under a temporary name that keeps the original extension.
///
/// The file is deleted when the returned handle drops.
pub(crate) fn persist_upload(original_name: Option<&str>, bytes: &[u8]) -> Result<NamedTempFile> {
    let suffix = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|extension| extension.to_str())
        .map(|extension| format!(".{}", extension.to_lowercase()))
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("granthx-upload-")
        .suffix(&suffix)
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

async fn receive_upload(multipart: &mut Multipart) -> Result<NamedTempFile> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GranthError::UnsupportedInput(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field.file_name().map(ToString::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| GranthError::UnsupportedInput(format!("Failed to read upload: {e}")))?;

        info!(
            "Received upload {} ({} bytes)",
            original_name.as_deref().unwrap_or("<unnamed>"),
            bytes.len()
        );
        return persist_upload(original_name.as_deref(), &bytes);
    }

    Err(GranthError::UnsupportedInput("No file uploaded".to_string()))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<IndexResponse>, ApiError> {
    let file = receive_upload(&mut multipart).await?;
    let receipt = state
        .indexer
        .ingest(&InputDescriptor::File(file.path().to_path_buf()))
        .await?;
    drop(file);

    Ok(Json(IndexResponse::indexed(
        "File indexed successfully",
        receipt,
    )))
}

async fn index_input(
    State(state): State<AppState>,
    body: std::result::Result<Json<IndexRequest>, JsonRejection>,
) -> std::result::Result<Json<IndexResponse>, ApiError> {
    let Json(request) = body?;
    let input = match request.input {
        Value::String(input) => InputDescriptor::Raw(input),
        Value::Null => {
            return Err(GranthError::UnsupportedInput("input is required".to_string()).into());
        }
        other => {
            return Err(GranthError::UnsupportedInput(format!(
                "input must be a URL or text, got {}",
                json_kind(&other)
            ))
            .into());
        }
    };

    info!("Indexing {}", input.describe());
    let receipt = state.indexer.ingest(&input).await?;

    Ok(Json(IndexResponse::indexed(
        "Content indexed successfully",
        receipt,
    )))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

async fn chat(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body?;
    let turn = state
        .chat
        .chat(&request.query, state.chat.defaults(), None)
        .await?;

    Ok(Json(ChatResponse {
        success: true,
        response: turn.answer,
    }))
}

/// Messages forwarded from the answering task to the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamMessage {
    Token(String),
    Done(String),
    Failed(String),
}

impl StreamMessage {
    fn into_event(self) -> Event {
        match self {
            Self::Token(token) => Event::default().event("token").data(token),
            Self::Done(answer) => Event::default()
                .event("done")
                .data(json!({ "success": true, "response": answer }).to_string()),
            Self::Failed(message) => Event::default()
                .event("error")
                .data(json!({ "success": false, "error": message }).to_string()),
        }
    }
}

/// Aborts the answering task when the client goes away
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    let Json(request) = body?;
    if request.query.trim().is_empty() {
        return Err(GranthError::UnsupportedInput("query must not be empty".to_string()).into());
    }

    let (sender, receiver) = mpsc::unbounded_channel();
    let service = Arc::clone(&state.chat);

    let task = tokio::spawn(async move {
        let token_sender = sender.clone();
        let mut sink = move |token: &str| {
            let _ = token_sender.send(StreamMessage::Token(token.to_string()));
        };
        let options = service.defaults().clone().streaming(true);

        let last = match service.chat(&request.query, &options, Some(&mut sink)).await {
            Ok(turn) => StreamMessage::Done(turn.answer),
            Err(e) => {
                warn!("Streaming chat failed: {}", e);
                StreamMessage::Failed(e.to_string())
            }
        };
        let _ = sender.send(last);
    });

    let guard = AbortOnDrop(task.abort_handle());
    let events = futures::stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        receiver
            .recv()
            .await
            .map(|message| (Ok::<_, Infallible>(message.into_event()), (receiver, guard)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
