//! Vision-model analysis: the production [`AnalysisService`].
//!
//! One step becomes one chat request: a system message (rules and answer
//! format) and a user message carrying the step instructions, the scoped
//! extraction as JSON and every page of the projected sub-document as a PNG.
//! Prompt wording lives in [`crate::prompts`]; this module only owns
//! message layout, provider resolution and retries.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) with 500 ms base and 2 retries waits
//! 500 ms → 1 s. The per-step timeout set by the orchestrator covers the
//! retries too, so a step never outlives its budget.

use crate::config::ReviewConfig;
use crate::error::{ReviewError, StepError};
use crate::pipeline::{encode, render};
use crate::service::{AnalysisResponse, AnalysisService, StepRequest};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// [`AnalysisService`] over an `edgequake-llm` provider.
#[derive(Clone)]
pub struct LlmAnalysisService {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    max_rendered_pixels: u32,
}

impl std::fmt::Debug for LlmAnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAnalysisService")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl LlmAnalysisService {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ReviewConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]).
    pub fn from_config(config: &ReviewConfig) -> Result<Self, ReviewError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn page_images(&self, request: &StepRequest) -> Result<Vec<ImageData>, StepError> {
        let step = request.chunk.number();
        let images = render::render_pages(request.pdf.clone(), self.max_rendered_pixels)
            .await
            .map_err(|e| StepError::Projection {
                step,
                detail: e.to_string(),
            })?;
        encode::encode_pages(&images).map_err(|e| StepError::Projection {
            step,
            detail: format!("image encoding failed: {e}"),
        })
    }
}

/// Build the user-message text: instructions followed by the scoped extraction.
pub fn user_message_text(request: &StepRequest) -> String {
    let extraction = serde_json::to_string(&request.extraction).unwrap_or_else(|e| {
        warn!("Could not serialise extraction: {}", e);
        "{}".to_string()
    });
    format!(
        "{}\n\n## Extracted document structure (JSON)\n\n{}",
        request.instructions, extraction
    )
}

#[async_trait]
impl AnalysisService for LlmAnalysisService {
    async fn analyze(&self, request: &StepRequest) -> Result<AnalysisResponse, StepError> {
        let start = Instant::now();
        let step = request.chunk.number();
        let images = self.page_images(request).await?;
        debug!("Step {}: {} page image(s) attached", step, images.len());

        let messages = vec![
            ChatMessage::system(&request.system_prompt),
            ChatMessage::user_with_images(user_message_text(request), images),
        ];
        let options = self.options();

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Step {}: retry {}/{} after {}ms",
                    step, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Step {}: {} input tokens, {} output tokens, {:?}",
                        step,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(AnalysisResponse {
                        text: response.content,
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                    });
                }
                Err(e) => {
                    warn!("Step {}: attempt {} failed: {}", step, attempt + 1, e);
                    last_err = Some(e.to_string());
                }
            }
        }

        Err(StepError::Service {
            step,
            detail: last_err.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ReviewError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ReviewError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured even when several API keys are present.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ReviewConfig) -> Result<Arc<dyn LLMProvider>, ReviewError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ReviewError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fixtures;
    use crate::planner::Chunk;

    #[test]
    fn user_message_carries_instructions_and_true_pages() {
        let chunk = Chunk {
            index: 1,
            start: 33,
            end: 68,
        };
        let request = StepRequest {
            chunk,
            total_steps: 4,
            pdf: Vec::new(),
            extraction: fixtures::extraction(105).scoped_to(&chunk),
            system_prompt: "system".into(),
            instructions: "Review pages 34-68.".into(),
        };
        let text = user_message_text(&request);
        assert!(text.starts_with("Review pages 34-68."));
        assert!(text.contains("\"page\":34"));
        assert!(!text.contains("\"page\":33"));
    }
}
