use crate::config::ModelConfig;
use crate::inference::InferenceAdapter;
use pagegist_core::{first_success, SummaryModel, SENTINEL_SUMMARY};

/// Tries summary models in order; never fails.
pub struct SummarizationOrchestrator {
    models: Vec<Box<dyn SummaryModel>>,
}

impl SummarizationOrchestrator {
    pub fn new(models: Vec<Box<dyn SummaryModel>>) -> Self {
        Self { models }
    }

    /// Primary generation model first, dedicated summarization model second.
    pub fn hosted(client: reqwest::Client, cfg: &ModelConfig) -> Self {
        let models: Vec<Box<dyn SummaryModel>> = vec![
            Box::new(InferenceAdapter::primary(client.clone(), cfg)),
            Box::new(InferenceAdapter::secondary(client, cfg)),
        ];
        Self::new(models)
    }

    /// The first accepted summary, or [`SENTINEL_SUMMARY`] when every model failed.
    pub async fn summarize(&self, text: &str) -> String {
        let out = first_success(&self.models, |m| async move {
            m.summarize(text).await.inspect_err(|e| {
                tracing::warn!(model = m.name(), error = %e, "summary model failed");
            })
        })
        .await;
        match out {
            Ok(s) => s.into_string(),
            Err(failures) => {
                tracing::warn!(attempts = failures.len(), "no summary model succeeded");
                SENTINEL_SUMMARY.to_string()
            }
        }
    }
}
