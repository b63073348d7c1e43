//! Per-step request assembly.
//!
//! Picks the instruction variant for a step (single pass, first step,
//! continuation) and bundles it with the step's sub-document and scoped
//! extraction. Continuation steps receive the accumulated issue list exactly
//! as it stood after the previous step.

use crate::config::OutputFormat;
use crate::document::{Document, Extraction};
use crate::issues::Issue;
use crate::planner::Chunk;
use crate::prompts::{self, PromptContext};
use crate::service::StepRequest;

/// One inbound review: the document plus what is known about it.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub document: Document,
    /// Document-type identifier, e.g. `"policy-brief"`.
    pub document_type: String,
    /// Confidence of the document-type detection, `0.0..=1.0`.
    pub confidence: f32,
    pub output_format: OutputFormat,
}

impl ReviewRequest {
    pub fn new(
        document: Document,
        document_type: impl Into<String>,
        confidence: f32,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            document,
            document_type: document_type.into(),
            confidence,
            output_format,
        }
    }

    pub fn prompt_context(&self) -> PromptContext {
        PromptContext {
            document_type: self.document_type.clone(),
            confidence: self.confidence,
            output_format: self.output_format,
            page_count: self.document.page_count(),
        }
    }
}

/// Builds the [`StepRequest`] for each step of one review.
#[derive(Debug, Clone)]
pub struct StepRequestBuilder {
    system_prompt: String,
    context: PromptContext,
    total_steps: usize,
    chunked: bool,
}

impl StepRequestBuilder {
    /// `chunked` is false when the whole document is reviewed in one pass.
    pub fn new(
        system_prompt: impl Into<String>,
        context: PromptContext,
        total_steps: usize,
        chunked: bool,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            context,
            total_steps,
            chunked,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Instruction text for `chunk` given the issues accumulated so far.
    pub fn instructions(&self, chunk: &Chunk, accumulated: &[Issue]) -> String {
        if !self.chunked {
            return prompts::single_pass_instructions(&self.context);
        }
        if chunk.is_first() {
            return prompts::first_step_instructions(&self.context, chunk, self.total_steps);
        }
        let accumulated_json =
            serde_json::to_string_pretty(accumulated).unwrap_or_else(|_| "[]".to_string());
        prompts::continuation_instructions(&self.context, chunk, self.total_steps, &accumulated_json)
    }

    pub fn build(
        &self,
        chunk: Chunk,
        pdf: Vec<u8>,
        extraction: Extraction,
        accumulated: &[Issue],
    ) -> StepRequest {
        StepRequest {
            chunk,
            total_steps: self.total_steps,
            pdf,
            extraction,
            system_prompt: self.system_prompt.clone(),
            instructions: self.instructions(&chunk, accumulated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::IssueCategory;

    fn builder(chunked: bool) -> StepRequestBuilder {
        StepRequestBuilder::new(
            "system",
            PromptContext {
                document_type: "publication".into(),
                confidence: 0.9,
                output_format: OutputFormat::Digital,
                page_count: 105,
            },
            4,
            chunked,
        )
    }

    #[test]
    fn single_pass_ignores_chunk_framing() {
        let chunk = Chunk {
            index: 0,
            start: 0,
            end: 12,
        };
        let text = builder(false).instructions(&chunk, &[]);
        assert!(!text.contains("part 1 of"));
        assert!(text.contains("ISBN"));
    }

    #[test]
    fn continuation_carries_accumulated_issues() {
        let chunk = Chunk {
            index: 2,
            start: 66,
            end: 101,
        };
        let prior = vec![Issue::new(
            IssueCategory::NeedsAttention,
            "Body text below 9pt",
            "Captions on p. 40 use 7pt",
            vec![40],
        )];
        let req = builder(true).build(chunk, b"%PDF".to_vec(), Extraction::default(), &prior);
        assert_eq!(req.total_steps, 4);
        assert_eq!(req.system_prompt, "system");
        assert!(req.instructions.contains("part 3 of 4"));
        assert!(req.instructions.contains("Body text below 9pt"));
        assert!(req.instructions.contains("\"pages\": [\n      40\n    ]"));
    }
}
