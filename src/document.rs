//! The reviewed document and its structural extraction.
//!
//! The extraction (text spans, images, margins, fonts, metadata) is produced
//! upstream by the PDF extraction service and handed to the reviewer as JSON.
//! Every entity carries its **true** 1-indexed page number; scoping an
//! extraction to a page range keeps those numbers untouched so the model can
//! report findings against real pages without any translation step.

use crate::error::ReviewError;
use crate::planner::Chunk;
use serde::{Deserialize, Serialize};

/// A document submitted for review. Owned by the caller; read-only here.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Vec<u8>,
    extraction: Extraction,
}

impl Document {
    /// Validate and wrap a PDF and its extraction.
    pub fn new(bytes: Vec<u8>, extraction: Extraction) -> Result<Self, ReviewError> {
        crate::pipeline::input::ensure_pdf(&bytes)?;
        if extraction.metadata.page_count == 0 {
            return Err(ReviewError::NoPages);
        }
        Ok(Self { bytes, extraction })
    }

    pub fn page_count(&self) -> usize {
        self.extraction.metadata.page_count
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn extraction(&self) -> &Extraction {
        &self.extraction
    }

    pub fn filename(&self) -> &str {
        &self.extraction.metadata.filename
    }
}

/// Complete structural extraction of a PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    #[serde(default)]
    pub margins: Vec<PageMargins>,
    #[serde(default)]
    pub fonts: Vec<FontSummary>,
}

impl Extraction {
    /// Decode extraction JSON as sent by the extraction service.
    pub fn from_json(json: &str) -> Result<Self, ReviewError> {
        serde_json::from_str(json).map_err(|e| ReviewError::InvalidExtraction(e.to_string()))
    }

    /// Subset relevant to `chunk`, with page numbers left as true numbers.
    ///
    /// The font summary is document-wide and kept whole so the model still
    /// sees the full font palette. Metadata reports the chunk's page count.
    pub fn scoped_to(&self, chunk: &Chunk) -> Extraction {
        let in_range = |page: usize| chunk.contains_page(page);

        Extraction {
            metadata: DocumentMetadata {
                page_count: chunk.len(),
                ..self.metadata.clone()
            },
            text_blocks: self
                .text_blocks
                .iter()
                .filter(|tb| in_range(tb.page))
                .cloned()
                .collect(),
            images: self
                .images
                .iter()
                .filter(|img| in_range(img.page))
                .cloned()
                .collect(),
            margins: self
                .margins
                .iter()
                .filter(|m| in_range(m.page))
                .cloned()
                .collect(),
            fonts: self.fonts.clone(),
        }
    }
}

/// Document-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub filename: String,
    pub page_count: usize,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub job_number: Option<String>,
}

/// A run of text with uniform styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub font: String,
    pub size: f32,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    /// RGB packed into an integer.
    #[serde(default)]
    pub color: u32,
    /// x0, y0, x1, y1 in points.
    pub bbox: [f32; 4],
    pub page: usize,
}

/// An embedded raster image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub xref: i64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub colorspace: String,
    pub dpi_x: f32,
    pub dpi_y: f32,
    pub bbox: [f32; 4],
    pub page: usize,
    #[serde(default)]
    pub has_mask: bool,
    #[serde(default)]
    pub width_mm: Option<f32>,
    #[serde(default)]
    pub height_mm: Option<f32>,
}

/// Measured margins of one page, in points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMargins {
    pub page: usize,
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
    /// Binding-side margin (right-hand binding assumed).
    #[serde(default)]
    pub inside: f32,
    #[serde(default)]
    pub outside: f32,
}

/// A font and the pages it appears on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSummary {
    pub name: String,
    pub count: usize,
    #[serde(default)]
    pub pages: Vec<usize>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Extraction with one text block, one image and one margin entry per page.
    pub fn extraction(page_count: usize) -> Extraction {
        let pages = 1..=page_count;
        Extraction {
            metadata: DocumentMetadata {
                filename: "report.pdf".into(),
                page_count,
                title: Some("Global Outlook".into()),
                isbn: Some("978-92-807-0000-0".into()),
                ..Default::default()
            },
            text_blocks: pages
                .clone()
                .map(|page| TextBlock {
                    text: format!("text on page {page}"),
                    font: "Roboto".into(),
                    size: 10.0,
                    bold: false,
                    italic: false,
                    color: 0,
                    bbox: [72.0, 72.0, 300.0, 90.0],
                    page,
                })
                .collect(),
            images: pages
                .clone()
                .map(|page| ImageInfo {
                    xref: page as i64,
                    width: 1200,
                    height: 800,
                    colorspace: "DeviceRGB".into(),
                    dpi_x: 150.0,
                    dpi_y: 150.0,
                    bbox: [0.0, 0.0, 200.0, 130.0],
                    page,
                    has_mask: false,
                    width_mm: None,
                    height_mm: None,
                })
                .collect(),
            margins: pages
                .map(|page| PageMargins {
                    page,
                    top: 56.0,
                    bottom: 56.0,
                    left: 48.0,
                    right: 48.0,
                    inside: 48.0,
                    outside: 48.0,
                })
                .collect(),
            fonts: vec![FontSummary {
                name: "Roboto".into(),
                count: page_count,
                pages: (1..=page_count).collect(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_extraction_keeps_true_page_numbers() {
        let full = fixtures::extraction(105);
        let chunk = Chunk {
            index: 1,
            start: 33,
            end: 68,
        };
        let scoped = full.scoped_to(&chunk);

        assert_eq!(scoped.text_blocks.len(), 35);
        assert_eq!(scoped.text_blocks.first().unwrap().page, 34);
        assert_eq!(scoped.text_blocks.last().unwrap().page, 68);
        assert!(scoped.images.iter().all(|i| (34..=68).contains(&i.page)));
        assert!(scoped.margins.iter().all(|m| (34..=68).contains(&m.page)));
        assert_eq!(scoped.metadata.page_count, 35);
        assert_eq!(scoped.metadata.isbn, full.metadata.isbn);
        // Font summary is document-wide.
        assert_eq!(scoped.fonts, full.fonts);
    }

    #[test]
    fn extraction_json_with_missing_optional_fields() {
        let json = r#"{
            "metadata": { "filename": "a.pdf", "page_count": 2 },
            "text_blocks": [
                { "text": "Hi", "font": "Arial", "size": 9.5,
                  "bbox": [0, 0, 10, 10], "page": 2 }
            ]
        }"#;
        let ex = Extraction::from_json(json).unwrap();
        assert_eq!(ex.metadata.page_count, 2);
        assert_eq!(ex.text_blocks[0].page, 2);
        assert!(ex.images.is_empty());
    }

    #[test]
    fn malformed_extraction_is_rejected() {
        let err = Extraction::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ReviewError::InvalidExtraction(_)));
    }

    #[test]
    fn document_rejects_non_pdf_and_zero_pages() {
        let ex = fixtures::extraction(3);
        assert!(matches!(
            Document::new(b"hello world".to_vec(), ex.clone()),
            Err(ReviewError::NotAPdf { .. })
        ));

        let mut empty = ex;
        empty.metadata.page_count = 0;
        assert!(matches!(
            Document::new(b"%PDF-1.7\n".to_vec(), empty),
            Err(ReviewError::NoPages)
        ));
    }
}
