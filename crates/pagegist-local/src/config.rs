//! Process-wide pipeline configuration.
//!
//! Built once at startup (from the environment or from defaults), immutable afterwards, and
//! injected into every extractor/adapter instance. Nothing below this module reads the
//! environment on its own.

use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

pub const DEFAULT_PRIMARY_MODEL_URL: &str =
    "https://api-inference.huggingface.co/models/meta-llama/Meta-Llama-3-8B-Instruct";
pub const DEFAULT_SECONDARY_MODEL_URL: &str =
    "https://api-inference.huggingface.co/models/facebook/bart-large-cnn";

/// Content-region selectors tried, in order, against a rendered page.
pub const DEFAULT_CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    ".content",
    ".article-content",
    "#content",
    "body",
];

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_truthy(key: &str) -> bool {
    matches!(
        env(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_ms(key: &str, default: Duration) -> Duration {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub user_agent: String,
    pub fetch_timeout: Duration,
    /// Hard cap on bytes read from a static response body.
    pub max_body_bytes: u64,
    /// Static text shorter than this (chars) counts as a failed static attempt.
    pub min_static_chars: usize,
    /// Output bound (chars) for both strategies.
    pub max_chars: usize,
    pub render_disabled: bool,
    /// Bound for page navigation and for the body-presence wait, each.
    pub render_timeout: Duration,
    pub content_selectors: Vec<String>,
    pub node_bin: String,
    pub node_path: Option<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout: Duration::from_secs(10),
            max_body_bytes: 5_000_000,
            min_static_chars: 50,
            max_chars: 4_000,
            render_disabled: false,
            render_timeout: Duration::from_secs(10),
            content_selectors: DEFAULT_CONTENT_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            node_bin: "node".to_string(),
            node_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub primary_url: String,
    pub secondary_url: String,
    /// Bearer token for the inference endpoints. Never logged.
    pub token: Option<String>,
    pub timeout: Duration,
    /// Normalized summaries shorter than this (chars) are rejected.
    pub min_summary_chars: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_PRIMARY_MODEL_URL.to_string(),
            secondary_url: DEFAULT_SECONDARY_MODEL_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            min_summary_chars: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub extract: ExtractConfig,
    pub models: ModelConfig,
    pub words_per_minute: usize,
    pub topic: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract: ExtractConfig::default(),
            models: ModelConfig::default(),
            words_per_minute: 150,
            topic: "Technology".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            extract: ExtractConfig {
                fetch_timeout: env_ms("PAGEGIST_FETCH_TIMEOUT_MS", d.extract.fetch_timeout),
                render_disabled: env_truthy("PAGEGIST_RENDER_DISABLE"),
                render_timeout: env_ms("PAGEGIST_RENDER_TIMEOUT_MS", d.extract.render_timeout),
                node_bin: env("PAGEGIST_NODE").unwrap_or(d.extract.node_bin),
                node_path: env("PAGEGIST_NODE_PATH"),
                ..d.extract
            },
            models: ModelConfig {
                primary_url: env("PAGEGIST_PRIMARY_MODEL_URL").unwrap_or(d.models.primary_url),
                secondary_url: env("PAGEGIST_SECONDARY_MODEL_URL")
                    .unwrap_or(d.models.secondary_url),
                token: env("HUGGINGFACE_TOKEN"),
                timeout: env_ms("PAGEGIST_MODEL_TIMEOUT_MS", d.models.timeout),
                ..d.models
            },
            topic: env("PAGEGIST_TOPIC").unwrap_or(d.topic),
            ..d
        }
    }

    /// Shared HTTP client for model calls. Per-request timeouts still apply on top.
    pub fn http_client(&self) -> pagegist_core::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("pagegist/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(self.models.timeout.max(self.extract.fetch_timeout))
            .build()
            .map_err(|e| pagegist_core::Error::NotConfigured(e.to_string()))
    }
}
