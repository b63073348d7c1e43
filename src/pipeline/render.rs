//! pdfium binding and page rasterisation.
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and must not run on Tokio worker threads. Every call in this module
//! is blocking; async callers go through `tokio::task::spawn_blocking`.
//!
//! Page images are capped by their longest edge (`max_rendered_pixels`)
//! rather than by DPI: an A3 poster and an A5 flyer both come out around the
//! same size, which is what the vision model's tiling expects.

use crate::error::ReviewError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Bind to a pdfium library.
///
/// Resolution order: `PDFIUM_LIB_PATH`, then a library next to the current
/// working directory, then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, ReviewError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| {
                    ReviewError::PdfiumBindingFailed(format!("{}: {}", path.display(), e))
                });
        }
        debug!("PDFIUM_LIB_PATH '{}' does not exist, falling back", path.display());
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ReviewError::PdfiumBindingFailed(e.to_string()))
}

/// Rasterise every page of an in-memory PDF.
///
/// Used on the projected sub-document of one step, so the page order of the
/// result is the step's page order.
pub fn render_all_pages(pdf: &[u8], max_pixels: u32) -> Result<Vec<DynamicImage>, ReviewError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| ReviewError::Pdf(format!("load: {e:?}")))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let pages = document.pages();
    let mut images = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ReviewError::Pdf(format!("render page {}: {e:?}", idx + 1)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

/// Async wrapper around [`render_all_pages`].
pub async fn render_pages(pdf: Vec<u8>, max_pixels: u32) -> Result<Vec<DynamicImage>, ReviewError> {
    tokio::task::spawn_blocking(move || render_all_pages(&pdf, max_pixels))
        .await
        .map_err(|e| ReviewError::Internal(format!("Render task panicked: {e}")))?
}
