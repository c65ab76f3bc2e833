//! JPEG encoding against a byte budget

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Encode `image` at the first quality in `ladder` whose output fits in `max_bytes`.
///
/// When no quality fits, the smallest encoding seen is returned instead; exceeding the
/// budget is never an error on its own.
pub fn encode_under_budget(image: &RgbImage, max_bytes: usize, ladder: &[u8]) -> Result<Vec<u8>> {
    let mut smallest: Option<Vec<u8>> = None;

    for &quality in ladder {
        let encoded = encode_jpeg(image, quality)?;
        if encoded.len() <= max_bytes {
            return Ok(encoded);
        }
        if smallest.as_ref().map_or(true, |best| encoded.len() < best.len()) {
            smallest = Some(encoded);
        }
    }

    smallest.context("Quality ladder is empty")
}

/// Encode image as JPEG with specified quality
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .with_context(|| format!("Failed to encode JPEG at quality {}", quality))?;

    Ok(buffer)
}
