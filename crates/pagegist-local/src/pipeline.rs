use crate::config::PipelineConfig;
use crate::extract::ContentExtractor;
use crate::summarize::SummarizationOrchestrator;
use futures_util::FutureExt;
use pagegist_core::{
    Error, ExtractedContent, ExtractionRequest, PipelineError, PipelineResult, ReadingStats,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Extraction failures are reported to callers with this fixed message; the detail goes to logs.
pub const EXTRACTION_FAILED: &str = "Could not extract text from URL";

pub trait TopicDetector: Send + Sync {
    fn detect(&self, content: &ExtractedContent) -> String;
}

/// Labels every article with the same topic.
#[derive(Debug, Clone)]
pub struct FixedTopic(pub String);

impl TopicDetector for FixedTopic {
    fn detect(&self, _content: &ExtractedContent) -> String {
        self.0.clone()
    }
}

pub struct PipelineController {
    extractor: ContentExtractor,
    summarizer: SummarizationOrchestrator,
    topic: Box<dyn TopicDetector>,
    words_per_minute: usize,
}

impl PipelineController {
    pub fn new(
        extractor: ContentExtractor,
        summarizer: SummarizationOrchestrator,
        topic: Box<dyn TopicDetector>,
        words_per_minute: usize,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            topic,
            words_per_minute: words_per_minute.max(1),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> pagegist_core::Result<Self> {
        let extractor = ContentExtractor::local(Arc::new(cfg.extract.clone()))?;
        let summarizer = SummarizationOrchestrator::hosted(cfg.http_client()?, &cfg.models);
        Ok(Self::new(
            extractor,
            summarizer,
            Box::new(FixedTopic(cfg.topic.clone())),
            cfg.words_per_minute,
        ))
    }

    /// One request, start to finish. Panics inside any stage surface as
    /// [`PipelineError::Internal`].
    pub async fn run(&self, raw_url: &str) -> Result<PipelineResult, PipelineError> {
        match AssertUnwindSafe(self.run_inner(raw_url)).catch_unwind().await {
            Ok(out) => out,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(panic = %msg, "pipeline panicked");
                Err(PipelineError::Internal(msg))
            }
        }
    }

    async fn run_inner(&self, raw_url: &str) -> Result<PipelineResult, PipelineError> {
        let req = ExtractionRequest::parse(raw_url).map_err(|e| match e {
            Error::InvalidUrl(msg) => PipelineError::ClientInput(msg),
            other => PipelineError::ClientInput(other.to_string()),
        })?;

        let content = self.extractor.extract(&req).await.map_err(|e| {
            tracing::warn!(url = req.as_str(), error = %e, "extraction failed");
            PipelineError::ContentUnavailable(EXTRACTION_FAILED.to_string())
        })?;

        let summary = self.summarizer.summarize(&content.text).await;
        let stats = ReadingStats {
            read_time: (content.word_count() / self.words_per_minute) as u64,
            topic: self.topic.detect(&content),
        };
        tracing::info!(
            url = req.as_str(),
            strategy = content.source_strategy.as_str(),
            read_time = stats.read_time,
            "summarized"
        );
        Ok(PipelineResult { summary, stats })
    }
}
