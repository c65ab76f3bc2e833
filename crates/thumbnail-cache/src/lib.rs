//! On-demand thumbnail generation and caching for the community asset store
//!
//! Uploaded originals live under `/profile/upload/image/`. This crate turns them into small,
//! size-bounded JPEG previews under `/profile/upload/thumb/`, using the filesystem itself as
//! the cache index: a thumbnail is valid exactly when it exists and is not older than its
//! source.
//!
//! # Pipeline
//!
//! - **paths**: untrusted path confinement, eligibility and derived-name mapping
//! - **decode**: content-sniffed decoding with size limits, flattening onto white
//! - **resize**: nearest-neighbor downscaling into the bounding box
//! - **encode**: JPEG quality ladder searched against a byte budget
//! - **cache**: [`ThumbnailStore`], freshness checks and atomic persistence
//! - **warmup**: background sweep materializing missing or stale thumbnails at boot

pub mod cache;
pub mod decode;
pub mod encode;
pub mod generate;
pub mod paths;
pub mod resize;
pub mod warmup;

pub use cache::{CacheStats, ThumbnailOutcome, ThumbnailStore};
pub use generate::{generate_thumbnail, GeneratedThumbnail};
pub use paths::{
    classify, is_image_extension, is_thumbnailable_extension, AssetCategory,
    AssetLayout, AssetPathError, Eligibility, ResolvedAsset,
};
pub use warmup::{WarmupHandle, WarmupProgress, WarmupSweeper};

/// Encoding budget shared by every thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailConfig {
    /// Longest side of a thumbnail, in pixels
    pub max_side: u32,
    /// Byte budget the encoder searches for
    pub max_bytes: usize,
    /// JPEG qualities tried in order
    pub quality_ladder: Vec<u8>,
    /// Sources larger than this are never read
    pub max_source_bytes: u64,
    /// Sources wider or taller than this are refused by the decoder
    pub max_source_dimension: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_side: 140,
            max_bytes: 28 * 1024,
            quality_ladder: vec![70, 60, 50, 40, 32],
            max_source_bytes: 64 * 1024 * 1024, // 64MB
            max_source_dimension: 16_384,
        }
    }
}
