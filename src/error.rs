//! Error types for the review orchestrator.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReviewError`] — **Fatal**: the review cannot produce a result at all
//!   (bad input document, invalid configuration, no provider, every step
//!   failed). Returned as `Err(ReviewError)` from
//!   [`crate::orchestrator::SequentialReviewOrchestrator::run`] and surfaced
//!   to streaming consumers as a single terminal `error` event.
//!
//! * [`StepError`] — **Non-fatal**: one page-range step failed (timeout,
//!   transport error, projection glitch) but the review continues with the
//!   issues accumulated so far. Stored in [`crate::state::StepStatus`] and
//!   reported through a `chunk_progress` event with `status: "error"`.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the review library.
#[derive(Debug, Error)]
pub enum ReviewError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The document bytes were empty.
    #[error("Document is empty")]
    EmptyDocument,

    /// The bytes do not start with the `%PDF` magic.
    #[error("Document is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: [u8; 4] },

    /// The extraction reports no pages.
    #[error("Document has no pages (extraction page_count = 0)")]
    NoPages,

    /// The structural extraction JSON could not be decoded.
    #[error("Invalid extraction data: {0}")]
    InvalidExtraction(String),

    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Download of a URL input failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Rules / prompts ───────────────────────────────────────────────────
    /// No rules context file exists for the document type.
    #[error("Rules context not found: '{path}'")]
    RulesContextNotFound { path: PathBuf },

    // ── Collaborators ─────────────────────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    /// pdfium could not load or write a document.
    #[error("PDF operation failed: {0}")]
    Pdf(String),

    // ── Review outcome ────────────────────────────────────────────────────
    /// Every step failed; there is no accumulated state to report.
    #[error("All {total} review steps failed.\nFirst error: {first_error}")]
    AllStepsFailed { total: usize, first_error: String },

    /// The caller cancelled the review before any step succeeded.
    #[error("Review cancelled after {completed} completed step(s)")]
    Cancelled { completed: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single review step.
///
/// `step` is the 1-indexed position in the plan.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StepError {
    /// The analysis service did not answer within the per-step timeout.
    #[error("Step {step}: timed out after {secs}s")]
    Timeout { step: usize, secs: u64 },

    /// The analysis service returned an error after retries.
    #[error("Step {step}: analysis service error: {detail}")]
    Service { step: usize, detail: String },

    /// The page range could not be cut out of the source document.
    #[error("Step {step}: page extraction failed: {detail}")]
    Projection { step: usize, detail: String },
}

impl StepError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepError::Timeout { .. })
    }
}
