//! Hosted-inference summary models.
//!
//! Both models go through one [`InferenceAdapter`]; a [`ModelProfile`] carries everything that
//! differs between them (request shape, generation parameters, response field).

use crate::config::ModelConfig;
use crate::textnorm::TextNormalizer;
use pagegist_core::{Error, NormalizedSummary, Result, SummaryModel};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// Marker the instruction prompt ends with; generation models often echo everything up to it.
const SUMMARY_MARKER: &str = "Summary:";

const PROMPT_PREFIX: &str = "Analyze and summarize this article as if you're explaining it to someone who found it in a Google search:\n\n";
const PROMPT_SUFFIX: &str = "\n\nWrite a comprehensive summary that:\n\
1. Begins with \"This article discusses\" or \"This article explores\" or \"This article explains\"\n\
2. Clearly states what the article is about\n\
3. Highlights the main points and key insights\n\
4. Explains why this information is valuable or useful\n\
5. Uses natural, engaging language\n\
6. Provides enough context to understand the topic\n\n\
Remember: Write as if you're helping someone decide if this article is worth reading. Make it informative and helpful.\n\n\
Summary:";

const TASK_PREFIX: &str =
    "Focus on what's important for readers searching for this topic:\n\n";
const TASK_SUFFIX: &str = "\n\nProvide a detailed, useful summary that explains what this article covers and why it matters.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// Instruction prompt for a text-generation model; the reply may echo the prompt.
    PromptGeneration,
    /// Framed article text for a dedicated summarization model.
    SummarizationTask,
}

#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub name: String,
    pub endpoint: String,
    pub shape: RequestShape,
    pub parameters: serde_json::Value,
    /// Field holding the text in each element of the response array.
    pub output_field: String,
}

impl ModelProfile {
    pub fn primary(endpoint: impl Into<String>) -> Self {
        Self {
            name: "primary".to_string(),
            endpoint: endpoint.into(),
            shape: RequestShape::PromptGeneration,
            parameters: json!({
                "max_new_tokens": 250,
                "min_new_tokens": 100,
                "temperature": 0.4,
                "do_sample": true,
                "top_p": 0.95,
                "repetition_penalty": 1.2,
                "stop": ["\n\n", "Note:", "Remember:"],
            }),
            output_field: "generated_text".to_string(),
        }
    }

    pub fn secondary(endpoint: impl Into<String>) -> Self {
        Self {
            name: "secondary".to_string(),
            endpoint: endpoint.into(),
            shape: RequestShape::SummarizationTask,
            parameters: json!({
                "max_length": 150,
                "min_length": 100,
                "do_sample": true,
                "temperature": 0.4,
                "num_beams": 4,
                "early_stopping": true,
            }),
            output_field: "summary_text".to_string(),
        }
    }

    pub fn build_inputs(&self, text: &str) -> String {
        match self.shape {
            RequestShape::PromptGeneration => format!("{PROMPT_PREFIX}{text}{PROMPT_SUFFIX}"),
            RequestShape::SummarizationTask => format!("{TASK_PREFIX}{text}{TASK_SUFFIX}"),
        }
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: String,
    parameters: &'a serde_json::Value,
}

/// Everything after the last summary marker, or the whole reply when there is none.
fn strip_prompt_echo(s: &str) -> &str {
    s.rsplit_once(SUMMARY_MARKER).map(|(_, tail)| tail).unwrap_or(s)
}

/// Pull the text out of `[{"<field>": "..."}, ...]`. Only the first generation counts.
fn output_text(v: &serde_json::Value, field: &str) -> Result<String> {
    if let Some(err) = v.get("error") {
        let msg = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return Err(Error::Llm(format!("model error: {msg}")));
    }
    v.as_array()
        .and_then(|items| items.first())
        .and_then(|o| o.get(field))
        .and_then(|x| x.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Llm(format!("unexpected response shape (missing {field})")))
}

#[derive(Debug, Clone)]
pub struct InferenceAdapter {
    client: reqwest::Client,
    profile: ModelProfile,
    token: Option<String>,
    timeout: Duration,
    min_chars: usize,
    normalizer: TextNormalizer,
}

impl InferenceAdapter {
    pub fn new(client: reqwest::Client, profile: ModelProfile, cfg: &ModelConfig) -> Self {
        Self {
            client,
            profile,
            token: cfg.token.clone(),
            timeout: cfg.timeout,
            min_chars: cfg.min_summary_chars,
            normalizer: TextNormalizer::default(),
        }
    }

    pub fn primary(client: reqwest::Client, cfg: &ModelConfig) -> Self {
        Self::new(client, ModelProfile::primary(cfg.primary_url.clone()), cfg)
    }

    pub fn secondary(client: reqwest::Client, cfg: &ModelConfig) -> Self {
        Self::new(client, ModelProfile::secondary(cfg.secondary_url.clone()), cfg)
    }

    async fn call_raw(&self, text: &str) -> Result<String> {
        let body = InferenceRequest {
            inputs: self.profile.build_inputs(text),
            parameters: &self.profile.parameters,
        };
        let mut rb = self
            .client
            .post(&self.profile.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(t) = &self.token {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {t}"));
        }

        let t0 = std::time::Instant::now();
        let resp = rb
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        tracing::debug!(
            model = %self.profile.name,
            status = status.as_u16(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "inference response"
        );
        if !status.is_success() {
            return Err(Error::Llm(format!("{} HTTP {status}", self.profile.name)));
        }
        let v: serde_json::Value = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        output_text(&v, &self.profile.output_field)
    }
}

#[async_trait::async_trait]
impl SummaryModel for InferenceAdapter {
    fn name(&self) -> &str {
        &self.profile.name
    }

    async fn summarize(&self, text: &str) -> Result<NormalizedSummary> {
        let raw = self.call_raw(text).await?;
        let cleaned = self.normalizer.normalize(strip_prompt_echo(&raw));
        let chars = cleaned.chars().count();
        NormalizedSummary::accept(cleaned, self.min_chars).ok_or_else(|| {
            Error::Llm(format!(
                "{} summary too short ({chars} < {} chars)",
                self.profile.name, self.min_chars
            ))
        })
    }
}
