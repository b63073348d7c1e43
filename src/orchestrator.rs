//! The sequential review loop.
//!
//! ```text
//! Planning ─▶ Step(1) ─▶ Reconcile(1) ─▶ Step(2) ─▶ … ─▶ Finalizing ─▶ Complete | Failed
//! ```
//!
//! Steps run strictly one after another: step *i+1* is told about the issues
//! accumulated through step *i*, so there is nothing to parallelise. A failed
//! or timed-out step is recorded and skipped; the accumulated issues are
//! carried forward unchanged. The review only fails when no step succeeded.
//!
//! Cancellation is checked before each step and raced against the step in
//! flight. Dropping the in-flight future aborts the network call; whatever
//! was accumulated before that point is finalised and returned.

use crate::config::ReviewConfig;
use crate::error::{ReviewError, StepError};
use crate::issues::Issue;
use crate::pipeline::project::PageProjector;
use crate::planner::{Chunk, ChunkPlanner};
use crate::progress::{PartFailure, ProgressEmitter, ProgressEvent, StepOutcome};
use crate::prompts;
use crate::request::{ReviewRequest, StepRequestBuilder};
use crate::service::{AnalysisResponse, AnalysisService};
use crate::state::{ReviewResult, ReviewState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one document review at a time through its steps.
///
/// Collaborators are passed in by the caller; the orchestrator holds no
/// global state and can be shared across concurrent reviews behind an `Arc`.
pub struct SequentialReviewOrchestrator {
    service: Arc<dyn AnalysisService>,
    projector: Arc<dyn PageProjector>,
    config: ReviewConfig,
}

impl std::fmt::Debug for SequentialReviewOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialReviewOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SequentialReviewOrchestrator {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        projector: Arc<dyn PageProjector>,
        config: ReviewConfig,
    ) -> Self {
        Self {
            service,
            projector,
            config,
        }
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    fn system_prompt(&self) -> String {
        match &self.config.system_prompt {
            Some(custom) => custom.clone(),
            None => prompts::system_prompt(self.config.rules_context.as_deref().unwrap_or("")),
        }
    }

    /// Review without progress reporting or cancellation.
    pub async fn review(&self, request: &ReviewRequest) -> Result<ReviewResult, ReviewError> {
        self.run(request, &ProgressEmitter::noop(), &CancellationToken::new())
            .await
    }

    /// Run a review, reporting every transition through `emitter`.
    ///
    /// Emits exactly one `review_start`, one `chunk_progress` per attempted
    /// step, the review text as `text`, and one terminal `complete` or
    /// `error`. A fatal error is both emitted and returned.
    pub async fn run(
        &self,
        request: &ReviewRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<ReviewResult, ReviewError> {
        let outcome = self.run_inner(request, emitter, cancel).await;
        match &outcome {
            Ok(result) => {
                emitter.emit(ProgressEvent::ContentDelta {
                    text: result.text.clone(),
                });
                let failures = result
                    .steps
                    .iter()
                    .filter_map(|step| {
                        step.status.message().map(|message| PartFailure {
                            chunk: step.chunk.number(),
                            pages: step.chunk.page_label(),
                            error: message.to_string(),
                        })
                    })
                    .collect();
                emitter.emit(ProgressEvent::finished(result.completed_steps, failures));
            }
            Err(e) => emitter.emit(ProgressEvent::error(e.to_string())),
        }
        outcome
    }

    async fn run_inner(
        &self,
        request: &ReviewRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<ReviewResult, ReviewError> {
        let page_count = request.document.page_count();
        let planner = ChunkPlanner::from(&self.config);
        let chunked = planner.needs_chunking(page_count);
        let plan = planner.plan_review(page_count)?;
        let total = plan.len();

        info!(
            "Starting review: {} pages, {} step(s), type={}, format={} ({} DPI)",
            page_count,
            total,
            request.document_type,
            request.output_format,
            request.output_format.min_dpi()
        );
        emitter.emit(ProgressEvent::Start {
            total_chunks: total,
        });

        let builder =
            StepRequestBuilder::new(self.system_prompt(), request.prompt_context(), total, chunked);
        let mut state = ReviewState::new(page_count, total);
        let mut cancelled = false;

        for chunk in plan {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            info!("Processing {}/{}: pages {}", chunk.number(), total, chunk.page_label());
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.run_step(&builder, request, chunk, state.issues()) => Some(r),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let Some(outcome) = outcome else {
                debug!("{} abandoned in flight", chunk);
                cancelled = true;
                break;
            };

            let event = match outcome {
                Ok(response) => {
                    state.record_success(chunk, response, duration_ms);
                    step_event(&chunk, total, None)
                }
                Err(e) => {
                    let message = e.to_string();
                    state.record_failure(chunk, &e, duration_ms);
                    step_event(&chunk, total, Some(message))
                }
            };
            emitter.emit(event);
        }

        if cancelled {
            warn!(
                "Review cancelled after {} of {} step(s)",
                state.steps().len(),
                total
            );
        }
        state.finalize(cancelled)
    }

    async fn run_step(
        &self,
        builder: &StepRequestBuilder,
        request: &ReviewRequest,
        chunk: Chunk,
        accumulated: &[Issue],
    ) -> Result<AnalysisResponse, StepError> {
        let document = &request.document;
        let pdf = if chunk.start == 0 && chunk.end == document.page_count() {
            document.bytes().to_vec()
        } else {
            self.projector.project(document.bytes(), &chunk).await?
        };
        let extraction = document.extraction().scoped_to(&chunk);
        let step_request = builder.build(chunk, pdf, extraction, accumulated);

        let secs = self.config.step_timeout_secs;
        tokio::time::timeout(
            Duration::from_secs(secs),
            self.service.analyze(&step_request),
        )
        .await
        .map_err(|_| StepError::Timeout {
            step: chunk.number(),
            secs,
        })?
    }
}

fn step_event(chunk: &Chunk, total: usize, error: Option<String>) -> ProgressEvent {
    ProgressEvent::StepProgress {
        chunk: chunk.number(),
        total,
        pages: chunk.page_label(),
        status: if error.is_some() {
            StepOutcome::Error
        } else {
            StepOutcome::Complete
        },
        error,
    }
}
