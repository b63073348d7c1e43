//! Input resolution: load the document bytes from a local path or URL.
//!
//! The reviewer works on in-memory bytes (the HTTP server receives them as a
//! multipart part), so unlike a path-based renderer nothing is staged on
//! disk. The `%PDF` magic is checked up front so callers get a meaningful
//! error instead of a pdfium failure halfway through a review.

use crate::error::ReviewError;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject empty buffers and anything that does not start with `%PDF`.
pub fn ensure_pdf(bytes: &[u8]) -> Result<(), ReviewError> {
    if bytes.is_empty() {
        return Err(ReviewError::EmptyDocument);
    }
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ReviewError::NotAPdf { magic });
    }
    Ok(())
}

/// Load a PDF from a local path or an HTTP(S) URL.
pub async fn load_pdf(input: &str, timeout_secs: u64) -> Result<Vec<u8>, ReviewError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    ensure_pdf(&bytes)?;
    Ok(bytes)
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, ReviewError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ReviewError::FileNotFound { path })
        }
        Err(e) => Err(ReviewError::Internal(format!(
            "Failed to read '{}': {e}",
            path.display()
        ))),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ReviewError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ReviewError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ReviewError::DownloadFailed {
            url: url.to_string(),
            reason: if e.is_timeout() {
                format!("timed out after {timeout_secs}s")
            } else {
                e.to_string()
            },
        })?;

    if !response.status().is_success() {
        return Err(ReviewError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ReviewError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
