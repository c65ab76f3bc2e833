//! Thumbnail generation pipeline
//!
//! Decodes a source file, fits it into the configured bounding box with nearest-neighbor
//! sampling, flattens transparency onto white, and encodes a JPEG under the byte budget.

use crate::decode::{decode_source, flatten};
use crate::encode::encode_under_budget;
use crate::resize::{resize_nearest, target_dimensions};
use crate::ThumbnailConfig;
use anyhow::{bail, Result};
use std::path::Path;

/// Encoded thumbnail ready to be persisted
#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
}

/// Generate a thumbnail for the file at `source`
pub fn generate_thumbnail(source: &Path, config: &ThumbnailConfig) -> Result<GeneratedThumbnail> {
    let decoded = decode_source(source, config)?;
    let (source_width, source_height) = (decoded.width(), decoded.height());

    let (width, height) = target_dimensions(source_width, source_height, config.max_side);
    let resized = resize_nearest(&decoded.pixels, width, height);
    let opaque = flatten(&resized);

    let bytes = encode_under_budget(&opaque, config.max_bytes, &config.quality_ladder)?;
    if bytes.is_empty() {
        bail!("Encoder produced no data for {}", source.display());
    }

    Ok(GeneratedThumbnail {
        bytes,
        width,
        height,
        source_width,
        source_height,
    })
}
