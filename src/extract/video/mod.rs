
use async_trait::async_trait;
use fancy_regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{Metadata, RawDocument, TranscriptSource};
use crate::http::{self, RetryPolicy};
use crate::{GranthError, Result};

const PREFERRED_LANGUAGE: &str = "en";
const WATCH_URL: &str = "https://www.youtube.com/watch";

static PLAYER_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ytInitialPlayerResponse\s*=\s*").expect("valid regex"));
static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"));
static TRANSCRIPT_TEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("text").expect("valid selector"));

/// One timed caption line
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start: f64,
    pub duration: f64,
    pub text: String,
}

/// Captions plus the details shown on the video page
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTranscript {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub view_count: Option<u64>,
    pub language: String,
    pub segments: Vec<TranscriptSegment>,
}

impl VideoTranscript {
    /// Whole transcript as a single space-separated text
    #[inline]
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The transcript as one raw document carrying the video details as metadata
    #[inline]
    pub fn into_document(self) -> RawDocument {
        let content = self.text();
        let mut metadata = Metadata::new();
        metadata.insert(
            "source".to_string(),
            Value::String(format!("{}?v={}", WATCH_URL, self.video_id)),
        );
        metadata.insert("loader".to_string(), Value::String("video".to_string()));
        metadata.insert("video_id".to_string(), Value::String(self.video_id));
        metadata.insert("title".to_string(), Value::String(self.title));
        metadata.insert("description".to_string(), Value::String(self.description));
        metadata.insert("author".to_string(), Value::String(self.author));
        metadata.insert(
            "view_count".to_string(),
            self.view_count.map_or(Value::Null, Value::from),
        );
        metadata.insert("language".to_string(), Value::String(self.language));
        RawDocument::new(content, metadata)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    captions: Option<Captions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoDetails {
    video_id: String,
    title: String,
    short_description: String,
    author: String,
    view_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Captions {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    tracklist: Option<Tracklist>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Tracklist {
    caption_tracks: Vec<CaptionTrack>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
}

/// Everything needed from the watch page to fetch a transcript
#[derive(Debug)]
struct WatchPage {
    details: VideoDetails,
    tracks: Vec<CaptionTrack>,
}

/// Extract the video id from any of the common video URL shapes
#[inline]
pub fn video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let candidate = if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "v") {
        Some(id.into_owned())
    } else {
        let mut segments = url.path_segments()?;
        match segments.next() {
            Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
            _ => None,
        }
    }?;

    VIDEO_ID
        .is_match(&candidate)
        .unwrap_or(false)
        .then_some(candidate)
}

/// Pick the preferred caption language, falling back to the first track
#[inline]
pub fn select_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    tracks
        .iter()
        .find(|track| track.language_code == PREFERRED_LANGUAGE)
        .or_else(|| {
            tracks
                .iter()
                .find(|track| track.language_code.starts_with(PREFERRED_LANGUAGE))
        })
        .or_else(|| tracks.first())
}

fn parse_watch_page(html: &str, video_id: &str) -> Result<WatchPage> {
    let start = PLAYER_RESPONSE
        .find(html)
        .ok()
        .flatten()
        .map(|m| m.end())
        .ok_or_else(|| {
            GranthError::Extraction(format!("No player response found for video {video_id}"))
        })?;

    let rest = html.get(start..).unwrap_or_default();
    let response: PlayerResponse = serde_json::Deserializer::from_str(rest)
        .into_iter::<PlayerResponse>()
        .next()
        .ok_or_else(|| GranthError::Extraction(format!("Empty player response for {video_id}")))?
        .map_err(|e| {
            GranthError::Extraction(format!("Invalid player response for {video_id}: {e}"))
        })?;

    if let Some(status) = &response.playability_status {
        if !status.status.is_empty() && status.status != "OK" {
            return Err(GranthError::Extraction(format!(
                "Video {} is not playable: {}",
                video_id,
                status.reason.as_deref().unwrap_or(&status.status)
            )));
        }
    }

    let details = response.video_details.unwrap_or_else(|| VideoDetails {
        video_id: video_id.to_string(),
        ..Default::default()
    });
    let tracks = response
        .captions
        .and_then(|captions| captions.tracklist)
        .map(|tracklist| tracklist.caption_tracks)
        .unwrap_or_default();

    Ok(WatchPage { details, tracks })
}

/// Parse the timed-text XML served for a caption track
#[inline]
pub fn parse_timedtext(xml: &str) -> Vec<TranscriptSegment> {
    let document = Html::parse_fragment(xml);

    document
        .select(&TRANSCRIPT_TEXT)
        .filter_map(|element| {
            let raw = element.text().collect::<String>();
            let text = decode_entities(&raw)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }
            let attr = |name: &str| {
                element
                    .value()
                    .attr(name)
                    .and_then(|value| value.parse::<f64>().ok())
                    .unwrap_or_default()
            };
            Some(TranscriptSegment {
                start: attr("start"),
                duration: attr("dur"),
                text,
            })
        })
        .collect()
}

// Caption payloads are entity-escaped twice; the parser undoes the first layer
fn decode_entities(text: &str) -> String {
    text.replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Fetches captions and video details from YouTube watch pages
#[derive(Debug, Clone)]
pub struct YoutubeClient {
    agent: ureq::Agent,
    user_agent: String,
    retry: RetryPolicy,
    watch_url: String,
}

impl YoutubeClient {
    #[inline]
    pub fn new(user_agent: &str) -> Self {
        Self {
            agent: http::agent(Duration::from_secs(http::DEFAULT_TIMEOUT_SECONDS)),
            user_agent: user_agent.to_string(),
            retry: RetryPolicy::default(),
            watch_url: WATCH_URL.to_string(),
        }
    }

    /// Point the client at a different watch endpoint
    #[inline]
    pub fn with_watch_url(mut self, watch_url: impl Into<String>) -> Self {
        self.watch_url = watch_url.into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    fn get(&self, url: &str) -> Result<String> {
        http::with_retry(&self.retry, "video host", || {
            self.agent
                .get(url)
                .header("User-Agent", &self.user_agent)
                .header("Accept-Language", "en-US,en;q=0.9")
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|failure| failure.into_error(GranthError::Extraction))
    }

    /// Fetch the transcript synchronously; callers on the runtime use [`TranscriptSource`]
    #[inline]
    pub fn fetch_blocking(&self, url: &Url) -> Result<VideoTranscript> {
        let id = video_id(url)
            .ok_or_else(|| GranthError::UnsupportedInput(format!("no video id in {url}")))?;

        debug!("Fetching watch page for video {}", id);
        let watch_page_url = format!("{}?v={}&hl={}", self.watch_url, id, PREFERRED_LANGUAGE);
        let html = self.get(&watch_page_url)?;
        let WatchPage { details, tracks } = parse_watch_page(&html, &id)?;

        let track = select_track(&tracks)
            .ok_or_else(|| GranthError::TranscriptUnavailable(url.to_string()))?;
        debug!(
            "Using caption track '{}' of {} for video {}",
            track.language_code,
            tracks.len(),
            id
        );

        let xml = self.get(&track.base_url)?;
        let segments = parse_timedtext(&xml);
        if segments.is_empty() {
            return Err(GranthError::TranscriptUnavailable(url.to_string()));
        }

        info!(
            "Fetched transcript for video {} ({} segments)",
            id,
            segments.len()
        );

        Ok(VideoTranscript {
            video_id: if details.video_id.is_empty() {
                id
            } else {
                details.video_id
            },
            title: details.title,
            description: details.short_description,
            author: details.author,
            view_count: details.view_count.and_then(|count| count.parse().ok()),
            language: track.language_code.clone(),
            segments,
        })
    }
}

#[async_trait]
impl TranscriptSource for YoutubeClient {
    #[inline]
    async fn fetch_transcript(&self, url: &Url) -> Result<VideoTranscript> {
        let client = self.clone();
        let url = url.clone();
        tokio::task::spawn_blocking(move || client.fetch_blocking(&url))
            .await
            .map_err(|e| GranthError::Extraction(format!("Transcript task failed: {e}")))?
    }
}
