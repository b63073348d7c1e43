//! Page-range projection: cut a standalone sub-document out of the source PDF.
//!
//! The analysis service sees only the pages of the current step. Pages are
//! copied in order into a fresh document; the structural extraction that
//! accompanies them keeps true page numbers (see
//! [`crate::document::Extraction::scoped_to`]), so the two line up without
//! any renumbering.

use crate::error::{ReviewError, StepError};
use crate::planner::Chunk;
use crate::pipeline::render::bind_pdfium;
use async_trait::async_trait;
use tracing::debug;

/// Produces the sub-document for one step.
#[async_trait]
pub trait PageProjector: Send + Sync {
    /// Return a PDF containing exactly pages `[chunk.start, chunk.end)` of
    /// `pdf`, in order.
    async fn project(&self, pdf: &[u8], chunk: &Chunk) -> Result<Vec<u8>, StepError>;
}

/// [`PageProjector`] backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumProjector;

impl PdfiumProjector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PageProjector for PdfiumProjector {
    async fn project(&self, pdf: &[u8], chunk: &Chunk) -> Result<Vec<u8>, StepError> {
        let bytes = pdf.to_vec();
        let chunk = *chunk;
        let step = chunk.number();

        tokio::task::spawn_blocking(move || extract_page_range(&bytes, chunk.start, chunk.end))
            .await
            .map_err(|e| StepError::Projection {
                step,
                detail: format!("projection task panicked: {e}"),
            })?
            .map_err(|e| StepError::Projection {
                step,
                detail: e.to_string(),
            })
    }
}

/// Blocking implementation: copy `[start, end)` into a new document.
pub fn extract_page_range(pdf: &[u8], start: usize, end: usize) -> Result<Vec<u8>, ReviewError> {
    let pdfium = bind_pdfium()?;
    let source = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| ReviewError::Pdf(format!("load: {e:?}")))?;

    let total = source.pages().len() as usize;
    if start >= end || end > total {
        return Err(ReviewError::Pdf(format!(
            "page range [{start}, {end}) outside document of {total} pages"
        )));
    }

    let mut target = pdfium
        .create_new_pdf()
        .map_err(|e| ReviewError::Pdf(format!("create: {e:?}")))?;

    // pdfium page indices are u16; `total` above bounds both ends.
    target
        .pages_mut()
        .copy_page_range_from_document(&source, start as u16..=(end - 1) as u16, 0)
        .map_err(|e| ReviewError::Pdf(format!("copy pages: {e:?}")))?;

    let bytes = target
        .save_to_bytes()
        .map_err(|e| ReviewError::Pdf(format!("save: {e:?}")))?;

    debug!(
        "Projected pages {}-{} → {} bytes",
        start + 1,
        end,
        bytes.len()
    );
    Ok(bytes)
}
