use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("extraction failed: {0}")]
    Extract(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fixed summary text returned when every summary model failed.
pub const SENTINEL_SUMMARY: &str = "Could not generate a meaningful summary";

/// A validated, absolute `http(s)` URL to extract from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    url: url::Url,
}

impl ExtractionRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidUrl("URL is required".to_string()));
        }
        let url = url::Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self { url }),
            other => Err(Error::InvalidUrl(format!(
                "unsupported scheme {other:?} (expected http or https)"
            ))),
        }
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    Static,
    Rendered,
}

impl SourceStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStrategy::Static => "static",
            SourceStrategy::Rendered => "rendered",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Bounded plain text (never whitespace-only).
    pub text: String,
    pub source_strategy: SourceStrategy,
}

impl ExtractedContent {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Summary text that passed normalization and the minimum-length gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSummary {
    text: String,
}

impl NormalizedSummary {
    /// Returns `None` when `text` is shorter than `min_chars` characters; a short summary is
    /// treated as absent rather than degraded.
    pub fn accept(text: String, min_chars: usize) -> Option<Self> {
        if text.trim().is_empty() || text.chars().count() < min_chars {
            return None;
        }
        Some(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingStats {
    /// Whole minutes.
    pub read_time: u64,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineResult {
    pub summary: String,
    pub stats: ReadingStats,
}

/// Outward failure classification of a pipeline run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    ClientInput(String),
    #[error("{0}")]
    ContentUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ClientInput(_) => "client_input",
            PipelineError::ContentUnavailable(_) => "content_unavailable",
            PipelineError::Internal(_) => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::ClientInput(_) | PipelineError::ContentUnavailable(_) => 400,
            PipelineError::Internal(_) => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            kind: self.kind().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation (network + body read).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// The body hit `FetchRequest::max_bytes` and was cut.
    pub truncated: bool,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `charset` parameter of the `Content-Type` header, if any.
    pub fn charset(&self) -> Option<&str> {
        self.content_type.as_deref()?.split(';').skip(1).find_map(|param| {
            let (k, v) = param.split_once('=')?;
            k.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| v.trim().trim_matches('"'))
        })
    }

    /// Body decoded with the declared charset; UTF-8 when absent or unknown. Malformed sequences
    /// become U+FFFD.
    pub fn text(&self) -> String {
        let encoding = self
            .charset()
            .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
            .unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&self.bytes);
        text.into_owned()
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

/// A live headless-browser session. Implementations must release the browser when dropped,
/// so a session abandoned by a panic or a cancelled future never outlives its owner.
#[async_trait::async_trait]
pub trait RenderSession: Send {
    async fn load(&mut self, url: &str, timeout: Duration) -> Result<()>;
    /// Wait until `selector` is attached to the document.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()>;
    /// Rendered text of the first element matching `selector`, `None` if nothing matches.
    async fn query_selector_text(&mut self, selector: &str) -> Result<Option<String>>;
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    /// Acquire a fresh session. Sessions are never pooled or reused.
    async fn open(&self) -> Result<Box<dyn RenderSession>>;
}

/// One way of turning a URL into plain text.
#[async_trait::async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn strategy(&self) -> SourceStrategy;
    async fn extract(&self, req: &ExtractionRequest) -> Result<String>;
}

/// One hosted summary model behind a uniform success/failure contract.
#[async_trait::async_trait]
pub trait SummaryModel: Send + Sync {
    fn name(&self) -> &str;
    async fn summarize(&self, text: &str) -> Result<NormalizedSummary>;
}

/// Ordered fallback: run `attempt` over `providers` in order and return the first success.
///
/// Providers after the first success are never attempted. On exhaustion, every failure is
/// returned in provider order.
pub async fn first_success<'a, P, T, F, Fut>(
    providers: &'a [P],
    mut attempt: F,
) -> std::result::Result<T, Vec<Error>>
where
    F: FnMut(&'a P) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = Vec::with_capacity(providers.len());
    for p in providers {
        match attempt(p).await {
            Ok(v) => return Ok(v),
            Err(e) => failures.push(e),
        }
    }
    Err(failures)
}
