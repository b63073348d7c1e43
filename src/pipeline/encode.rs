//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG rather than JPEG: the reviewer judges small print, rules and image
//! edges, and JPEG ringing around text shows up as false layout findings.
//! `detail: "high"` lets GPT-4-class models tile the full page.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG ready for the vision API.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode all pages of one step, keeping page order.
///
/// Fails on the first page that cannot be encoded; a step with a missing
/// page would be reviewed against the wrong page numbers.
pub fn encode_pages(images: &[DynamicImage]) -> Result<Vec<ImageData>, image::ImageError> {
    images.iter().map(encode_page).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn encode_pages_keeps_order_and_count() {
        let pages: Vec<DynamicImage> = [1u32, 2, 3]
            .iter()
            .map(|w| DynamicImage::ImageRgba8(RgbaImage::new(*w * 4, 4)))
            .collect();
        let encoded = encode_pages(&pages).unwrap();
        assert_eq!(encoded.len(), 3);
        assert!(encoded.iter().all(|d| d.mime_type == "image/png"));
    }
}
