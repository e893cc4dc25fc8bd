// Extraction module
// Turns every supported input into a uniform list of raw documents

pub mod browser;
pub mod page;
pub mod pdf;
pub mod tabular;
pub mod video;


use async_trait::async_trait;
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};
use url::Url;

use self::browser::BrowserClient;
use self::video::{VideoTranscript, YoutubeClient};
use crate::config::Config;
use crate::{GranthError, Result};

/// Metadata carried from a source document onto every chunk cut from it
pub type Metadata = BTreeMap<String, Value>;

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];
const TABULAR_EXTENSIONS: &[&str] = &["csv", "tsv"];
const TEXT_FILE_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

static VIDEO_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://(www\.)?youtu").expect("valid regex"));
static WEB_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://").expect("valid regex"));

/// A single unit of extracted text, immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    content: String,
    metadata: Metadata,
}

impl RawDocument {
    #[inline]
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// What the caller handed us to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDescriptor {
    /// A local file supplied by the upload intake, with its original extension
    File(PathBuf),
    /// A URL, a path or plain text, as typed by the user
    Raw(String),
    /// Opaque bytes that are neither text nor a known file
    Binary(Vec<u8>),
}

impl InputDescriptor {
    /// Short human-readable description used in logs and errors
    #[inline]
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Raw(raw) if WEB_URL.is_match(raw.trim()).unwrap_or(false) => {
                raw.trim().to_string()
            }
            Self::Raw(raw) => format!("text input ({} chars)", raw.chars().count()),
            Self::Binary(bytes) => format!("binary input ({} bytes)", bytes.len()),
        }
    }
}

impl From<&str> for InputDescriptor {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Raw(value.to_string())
    }
}

impl From<String> for InputDescriptor {
    #[inline]
    fn from(value: String) -> Self {
        Self::Raw(value)
    }
}

/// The extraction strategy an input resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Document(PathBuf),
    Tabular(PathBuf),
    TextFile(PathBuf),
    Video(Url),
    WebPage(Url),
    Text(String),
}

/// Resolve an input to its extraction strategy; first match wins
#[inline]
pub fn classify(input: &InputDescriptor) -> Result<InputKind> {
    match input {
        InputDescriptor::File(path) => {
            if has_extension(path, DOCUMENT_EXTENSIONS) {
                Ok(InputKind::Document(path.clone()))
            } else if has_extension(path, TABULAR_EXTENSIONS) {
                Ok(InputKind::Tabular(path.clone()))
            } else if has_extension(path, TEXT_FILE_EXTENSIONS) {
                Ok(InputKind::TextFile(path.clone()))
            } else {
                Err(GranthError::UnsupportedInput(format!(
                    "no extractor for file {}",
                    path.display()
                )))
            }
        }
        InputDescriptor::Raw(raw) => {
            let trimmed = raw.trim();
            let single_line = !trimmed.is_empty() && !trimmed.contains('\n');

            if single_line && has_extension(Path::new(trimmed), DOCUMENT_EXTENSIONS) {
                return Ok(InputKind::Document(PathBuf::from(trimmed)));
            }
            if single_line && has_extension(Path::new(trimmed), TABULAR_EXTENSIONS) {
                return Ok(InputKind::Tabular(PathBuf::from(trimmed)));
            }
            if single_line && is_match(&VIDEO_URL, trimmed) {
                return parse_url(trimmed).map(InputKind::Video);
            }
            if single_line && is_match(&WEB_URL, trimmed) {
                return parse_url(trimmed).map(InputKind::WebPage);
            }

            Ok(InputKind::Text(raw.clone()))
        }
        InputDescriptor::Binary(bytes) => Err(GranthError::UnsupportedInput(format!(
            "binary input of {} bytes matches no extractor",
            bytes.len()
        ))),
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn is_match(regex: &Regex, text: &str) -> bool {
    regex.is_match(text).unwrap_or(false)
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| GranthError::UnsupportedInput(format!("invalid URL {raw}: {e}")))
}

/// Renders a URL in a real browser and returns the resulting HTML
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<String>;
}

/// Fetches captions and video details for a hosted video
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_transcript(&self, url: &Url) -> Result<VideoTranscript>;
}

/// Dispatches inputs to the matching extraction strategy
#[derive(Clone)]
pub struct ExtractorRegistry {
    renderer: Arc<dyn PageRenderer>,
    transcripts: Arc<dyn TranscriptSource>,
}

impl ExtractorRegistry {
    #[inline]
    pub fn new(renderer: Arc<dyn PageRenderer>, transcripts: Arc<dyn TranscriptSource>) -> Self {
        Self {
            renderer,
            transcripts,
        }
    }

    /// Build the registry with the real browser and video clients
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(BrowserClient::new(config.browser.clone())),
            Arc::new(YoutubeClient::new(&config.browser.user_agent)),
        )
    }

    /// Extract raw documents from any supported input
    #[inline]
    pub async fn extract(&self, input: &InputDescriptor) -> Result<Vec<RawDocument>> {
        let kind = classify(input)?;
        debug!("Input {} classified as {}", input.describe(), kind_name(&kind));

        let documents = match kind {
            InputKind::Document(path) => {
                info!("Processing PDF input: {}", path.display());
                run_blocking(move || pdf::extract_pages(&path)).await?
            }
            InputKind::Tabular(path) => {
                info!("Processing tabular input: {}", path.display());
                run_blocking(move || tabular::extract_rows(&path)).await?
            }
            InputKind::TextFile(path) => {
                info!("Processing text file input: {}", path.display());
                let content = tokio::fs::read_to_string(&path).await?;
                vec![text_document(content, &path.display().to_string(), "text_file")]
            }
            InputKind::Video(url) => {
                info!("Processing video URL input: {}", url);
                let transcript = self.transcripts.fetch_transcript(&url).await?;
                vec![transcript.into_document()]
            }
            InputKind::WebPage(url) => {
                info!("Processing web page input: {}", url);
                let html = self.renderer.render(&url).await?;
                let structured = page::structure_page(&html);
                let mut metadata = Metadata::new();
                metadata.insert("source".to_string(), Value::String(url.to_string()));
                metadata.insert("loader".to_string(), Value::String("web_page".to_string()));
                vec![RawDocument::new(structured, metadata)]
            }
            InputKind::Text(text) => {
                info!("Processing plain text input");
                vec![text_document(text, "text", "text")]
            }
        };

        debug!(
            "Extracted {} raw documents from {}",
            documents.len(),
            input.describe()
        );
        Ok(documents)
    }
}

fn kind_name(kind: &InputKind) -> &'static str {
    match kind {
        InputKind::Document(_) => "document",
        InputKind::Tabular(_) => "tabular",
        InputKind::TextFile(_) => "text file",
        InputKind::Video(_) => "video",
        InputKind::WebPage(_) => "web page",
        InputKind::Text(_) => "text",
    }
}

fn text_document(content: String, source: &str, loader: &str) -> RawDocument {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), Value::String(source.to_string()));
    metadata.insert("loader".to_string(), Value::String(loader.to_string()));
    RawDocument::new(content, metadata)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GranthError::Extraction(format!("Extraction task failed: {e}")))?
}
