//! The I/O-bound stages a review step goes through.
//!
//! The orchestrator owns the control flow; these modules do the work at its
//! edges and know nothing about steps beyond the page range they are given.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ project ──▶ render ──▶ encode ──▶ llm ──▶ postprocess
//! (URL/path) (sub-PDF)  (pdfium)   (base64)   (VLM)   (prose/sections)
//! ```
//!
//! 1. [`input`]   — load the PDF from a path or URL and check its magic bytes
//! 2. [`project`] — cut the step's page range out as a standalone PDF
//! 3. [`render`]  — rasterise the sub-document; pdfium runs in `spawn_blocking`
//! 4. [`encode`]  — PNG-encode and base64-wrap pages for the multimodal request
//! 5. [`llm`]     — the model call with retry/backoff; the only network stage
//! 6. [`postprocess`] — strip the issue block and split the prose into sections

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod project;
pub mod render;
