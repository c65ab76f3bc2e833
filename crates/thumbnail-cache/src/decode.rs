//! Source decoding for the thumbnail pipeline
//!
//! Formats are recognized by content, not by extension; the extension only decides
//! whether a file is handed to the decoder at all.

use crate::ThumbnailConfig;
use anyhow::{bail, Context, Result};
use image::{ImageFormat, ImageReader, Limits, Rgb, RgbImage, RgbaImage};
use std::fs;
use std::path::Path;

/// Opaque background every thumbnail is composited onto
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// A decoded source image
#[derive(Debug, Clone)]
pub struct DecodedSource {
    pub pixels: RgbaImage,
    pub format: ImageFormat,
}

impl DecodedSource {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Decode `path`, refusing oversized files before reading them
pub fn decode_source(path: &Path, config: &ThumbnailConfig) -> Result<DecodedSource> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to stat source {}", path.display()))?;
    if metadata.len() > config.max_source_bytes {
        bail!(
            "Source {} is {} bytes, limit is {}",
            path.display(),
            metadata.len(),
            config.max_source_bytes
        );
    }

    let mut reader = ImageReader::open(path)
        .with_context(|| format!("Failed to open source {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to sniff format of {}", path.display()))?;

    let Some(format) = reader.format() else {
        bail!("Unrecognized image content in {}", path.display());
    };

    let mut limits = Limits::default();
    limits.max_image_width = Some(config.max_source_dimension);
    limits.max_image_height = Some(config.max_source_dimension);
    reader.limits(limits);

    let image = reader
        .decode()
        .with_context(|| format!("Failed to decode {:?} image {}", format, path.display()))?;

    if image.width() == 0 || image.height() == 0 {
        bail!("Source {} has no pixels", path.display());
    }

    Ok(DecodedSource {
        pixels: image.to_rgba8(),
        format,
    })
}

/// Composite `pixels` onto [`BACKGROUND`], dropping the alpha channel
pub fn flatten(pixels: &RgbaImage) -> RgbImage {
    flatten_onto(pixels, BACKGROUND)
}

pub fn flatten_onto(pixels: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        let [r, g, b, a] = pixels.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |channel: u8, under: u8| {
            ((channel as u32 * alpha + under as u32 * (255 - alpha) + 127) / 255) as u8
        };
        Rgb([
            blend(r, background[0]),
            blend(g, background[1]),
            blend(b, background[2]),
        ])
    })
}
