//! The analysis-service seam.
//!
//! The orchestrator never talks to a model directly. It hands each step to
//! an [`AnalysisService`] constructed by the caller, which makes the review
//! loop testable with scripted fakes and keeps provider lifecycle out of the
//! core. [`crate::pipeline::llm::LlmAnalysisService`] is the production
//! implementation.

use crate::document::Extraction;
use crate::error::StepError;
use crate::planner::Chunk;
use async_trait::async_trait;

/// Everything the service needs for one step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub chunk: Chunk,
    /// Number of steps in the plan.
    pub total_steps: usize,
    /// Standalone PDF containing exactly the step's pages.
    pub pdf: Vec<u8>,
    /// Extraction scoped to the step, true page numbers preserved.
    pub extraction: Extraction,
    pub system_prompt: String,
    pub instructions: String,
}

/// The service's answer: prose with an embedded issue block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl AnalysisResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A multimodal reviewer of one page range.
///
/// Implementations return [`StepError::Service`] for transport and API
/// failures once their own retries are exhausted. Timeouts are imposed by
/// the caller.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, request: &StepRequest) -> Result<AnalysisResponse, StepError>;
}
