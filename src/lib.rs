//! # pdf-review-orchestrator
//!
//! Review large PDF publications against house rules with a multimodal LLM,
//! one overlapping page range at a time, reporting progress as it goes.
//!
//! ## Why chunk?
//!
//! A 150-page report rendered page by page does not fit in one model call.
//! Documents above a page threshold are split into overlapping ranges and
//! reviewed **sequentially**: each step sees its own pages plus the issue
//! list accumulated so far, and answers with a reconciled list. Findings
//! always carry true page numbers, so no remapping is needed between steps.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ReviewRequest (PDF + extraction JSON)
//!  │
//!  ├─ 1. Plan       overlapping page ranges (35 pages, 2 overlap, >40 pages only)
//!  ├─ 2. Project    cut each range out as a sub-PDF (pdfium, spawn_blocking)
//!  ├─ 3. Analyse    one vision-model call per range, per-step timeout
//!  ├─ 4. Reconcile  baseline │ consolidation │ extension of the issue list
//!  ├─ 5. Finalise   merged sections + one JSON issue block
//!  └─ 6. Report     review_start → chunk_progress × N → text → complete | error
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_review::{
//!     Document, Extraction, LlmAnalysisService, OutputFormat, PdfiumProjector,
//!     ReviewConfig, ReviewRequest, SequentialReviewOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReviewConfig::default();
//!     let service = Arc::new(LlmAnalysisService::from_config(&config)?);
//!     let orchestrator =
//!         SequentialReviewOrchestrator::new(service, Arc::new(PdfiumProjector::new()), config);
//!
//!     let extraction = Extraction::from_json(&std::fs::read_to_string("report.json")?)?;
//!     let document = Document::new(std::fs::read("report.pdf")?, extraction)?;
//!     let request = ReviewRequest::new(document, "publication", 0.9, OutputFormat::Print);
//!
//!     let result = orchestrator.review(&request).await?;
//!     println!("{}", result.text);
//!     eprintln!("{} issues, {}/{} steps ok",
//!         result.issues.len(), result.completed_steps, result.total_steps);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `pdf-review` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | Enables the axum HTTP/SSE transport ([`server`]) |
//!
//! Library-only use:
//! ```toml
//! pdf-review-orchestrator = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod issues;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod request;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod state;
pub mod stream;
pub mod tracker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OutputFormat, ReviewConfig, ReviewConfigBuilder};
pub use document::{Document, Extraction};
pub use error::{ReviewError, StepError};
pub use issues::{Issue, IssueCategory, IssueParse};
pub use orchestrator::SequentialReviewOrchestrator;
pub use pipeline::llm::LlmAnalysisService;
pub use pipeline::project::{PageProjector, PdfiumProjector};
pub use planner::{Chunk, ChunkPlanner};
pub use progress::{PartFailure, ProgressEmitter, ProgressEvent, SseDecoder, SseFrame, StepOutcome};
pub use request::ReviewRequest;
pub use service::{AnalysisResponse, AnalysisService, StepRequest};
pub use state::{Reconciliation, ReviewResult, StepResult, StepStatus};
pub use stream::{review_stream, ReviewEventStream};
pub use tracker::{ProgressTracker, ReviewMode, TrackerStatus};
