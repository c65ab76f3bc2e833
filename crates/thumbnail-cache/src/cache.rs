//! Thumbnail cache manager
//!
//! [`ThumbnailStore`] owns the thumbnail subtree. It decides whether an asset is eligible,
//! whether its cached thumbnail is still fresh, and regenerates it when it is not. Callers
//! only ever receive a URL to serve: any failure degrades to the original asset's URL, so a
//! broken pipeline never breaks asset delivery.

use crate::generate::{generate_thumbnail, GeneratedThumbnail};
use crate::paths::{classify, AssetLayout, Eligibility};
use crate::ThumbnailConfig;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, Metadata};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// rw-r--r--, matching how uploads land on disk
#[cfg(unix)]
const THUMBNAIL_MODE: u32 = 0o644;

/// What a call to [`ThumbnailStore::ensure`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    /// Not an original raster image, or already a thumbnail
    Ineligible,
    /// Source missing or a directory; nothing to cache
    MissingSource,
    /// Cached thumbnail was still valid
    Fresh(String),
    /// Thumbnail was (re)generated
    Generated(String),
    /// Generation failed; the original should be served
    Fallback,
}

impl ThumbnailOutcome {
    pub fn thumb_url(&self) -> Option<&str> {
        match self {
            ThumbnailOutcome::Fresh(url) | ThumbnailOutcome::Generated(url) => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    generated: AtomicU64,
    fallbacks: AtomicU64,
    skipped: AtomicU64,
}

/// Filesystem-backed thumbnail cache
#[derive(Debug)]
pub struct ThumbnailStore {
    layout: AssetLayout,
    config: ThumbnailConfig,
    counters: Counters,
}

impl ThumbnailStore {
    pub fn new(layout: AssetLayout, config: ThumbnailConfig) -> Self {
        Self {
            layout,
            config,
            counters: Counters::default(),
        }
    }

    /// Store over `storage_root` with the default encoding budget
    pub fn open(storage_root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(AssetLayout::new(storage_root)?, ThumbnailConfig::default()))
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.layout
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// URL to serve for `url`: its thumbnail when one is (or can be made) valid, otherwise
    /// `url` itself, unchanged.
    pub fn ensure_thumbnail(&self, url: &str) -> String {
        match self.ensure(url) {
            ThumbnailOutcome::Fresh(thumb_url) | ThumbnailOutcome::Generated(thumb_url) => {
                thumb_url
            }
            _ => url.to_string(),
        }
    }

    /// Make sure the thumbnail for `url` is valid, reporting what it took
    pub fn ensure(&self, url: &str) -> ThumbnailOutcome {
        let (source_url, thumb_url) = match classify(url) {
            Eligibility::Eligible {
                source_url,
                thumb_url,
            } => (source_url, thumb_url),
            Eligibility::Ineligible | Eligibility::AlreadyThumbnail => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(url, "not thumbnail-eligible");
                return ThumbnailOutcome::Ineligible;
            }
        };

        let source_path = self.layout.url_to_path(&source_url);
        let source_meta = match fs::metadata(&source_path) {
            Ok(meta) if !meta.is_dir() => meta,
            _ => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(url, "source missing, nothing to cache");
                return ThumbnailOutcome::MissingSource;
            }
        };

        let thumb_path = self.layout.url_to_path(&thumb_url);
        if is_fresh(&source_meta, &thumb_path) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(url, %thumb_url, "thumbnail cache hit");
            return ThumbnailOutcome::Fresh(thumb_url);
        }

        match self.regenerate(&source_path, &thumb_path) {
            Ok(thumbnail) => {
                self.counters.generated.fetch_add(1, Ordering::Relaxed);
                info!(
                    url,
                    %thumb_url,
                    width = thumbnail.width,
                    height = thumbnail.height,
                    bytes = thumbnail.bytes.len(),
                    "generated thumbnail"
                );
                ThumbnailOutcome::Generated(thumb_url)
            }
            Err(e) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(url, "thumbnail generation failed, serving original: {:#}", e);
                ThumbnailOutcome::Fallback
            }
        }
    }

    /// Best-effort removal of the thumbnail derived from `source_url`.
    /// Returns whether a file was removed.
    pub fn remove_thumbnail(&self, source_url: &str) -> bool {
        let Eligibility::Eligible { thumb_url, .. } = classify(source_url) else {
            return false;
        };

        match fs::remove_file(self.layout.url_to_path(&thumb_url)) {
            Ok(()) => {
                debug!(source_url, %thumb_url, "removed thumbnail");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(source_url, %thumb_url, "failed to remove thumbnail: {}", e);
                false
            }
        }
    }

    /// Snapshot of the hit/generation/degradation counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            generated: self.counters.generated.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    fn regenerate(&self, source_path: &Path, thumb_path: &Path) -> Result<GeneratedThumbnail> {
        let parent = thumb_path
            .parent()
            .context("Thumbnail path has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create thumbnail directory: {}", parent.display()))?;

        let thumbnail = generate_thumbnail(source_path, &self.config)?;
        persist_atomically(parent, thumb_path, &thumbnail.bytes)?;

        Ok(thumbnail)
    }
}

/// A thumbnail is fresh when it exists, is not a directory, and is not older than its source
fn is_fresh(source_meta: &Metadata, thumb_path: &Path) -> bool {
    let Ok(thumb_meta) = fs::metadata(thumb_path) else {
        return false;
    };
    if thumb_meta.is_dir() {
        return false;
    }

    match (source_meta.modified(), thumb_meta.modified()) {
        (Ok(source_mtime), Ok(thumb_mtime)) => thumb_mtime >= source_mtime,
        _ => false,
    }
}

/// Write `bytes` beside `target` and rename over it, so readers only ever see whole files.
/// The temporary file is removed if anything fails before the rename.
fn persist_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    temp.write_all(bytes)
        .context("Failed to write thumbnail data")?;
    // NamedTempFile starts at 0600; the static file server may run as another user
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(THUMBNAIL_MODE))
            .context("Failed to set thumbnail permissions")?;
    }
    temp.as_file()
        .sync_all()
        .context("Failed to flush thumbnail data")?;
    temp.persist(target)
        .with_context(|| format!("Failed to persist thumbnail: {}", target.display()))?;

    Ok(())
}

/// Cache counters for monitoring silent degradation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub generated: u64,
    pub fallbacks: u64,
    pub skipped: u64,
}

impl CacheStats {
    /// Calls that reached the cache check
    pub fn eligible_requests(&self) -> u64 {
        self.hits + self.generated + self.fallbacks
    }

    pub fn fallback_percent(&self) -> f64 {
        if self.eligible_requests() == 0 {
            0.0
        } else {
            (self.fallbacks as f64 / self.eligible_requests() as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use image::{GenericImageView, Rgb, RgbImage};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn setup() -> Result<(TempDir, ThumbnailStore)> {
        let temp_dir = tempdir()?;
        let store = ThumbnailStore::open(temp_dir.path())?;
        Ok((temp_dir, store))
    }

    fn write_png(store: &ThumbnailStore, url: &str, width: u32, height: u32) -> Result<PathBuf> {
        let path = store.layout().url_to_path(url);
        fs::create_dir_all(path.parent().unwrap())?;
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, 90]))
            .save(&path)?;
        Ok(path)
    }

    fn mtime(path: &Path) -> Result<FileTime> {
        Ok(FileTime::from_last_modification_time(&fs::metadata(path)?))
    }

    #[test]
    fn test_cold_generation() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/a.png", 300, 100)?;

        let served = store.ensure_thumbnail("/profile/upload/image/a.png");
        assert_eq!(served, "/profile/upload/thumb/a.jpg");

        let thumb_path = store.layout().url_to_path(&served);
        let bytes = fs::read(&thumb_path)?;
        assert!(bytes.len() <= 28 * 1024);
        assert_eq!(image::load_from_memory(&bytes)?.dimensions(), (140, 46));

        assert_eq!(store.stats().generated, 1);
        Ok(())
    }

    #[test]
    fn test_second_call_is_a_cache_hit() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/2024/b.png", 200, 200)?;

        let first = store.ensure("/profile/upload/image/2024/b.png");
        assert_eq!(first, ThumbnailOutcome::Generated("/profile/upload/thumb/2024/b.jpg".into()));
        let thumb_path = store.layout().url_to_path("/profile/upload/thumb/2024/b.jpg");
        let generated_at = mtime(&thumb_path)?;

        let second = store.ensure("/profile/upload/image/2024/b.png");
        assert_eq!(second, ThumbnailOutcome::Fresh("/profile/upload/thumb/2024/b.jpg".into()));
        assert_eq!(mtime(&thumb_path)?, generated_at);

        let stats = store.stats();
        assert_eq!((stats.generated, stats.hits, stats.fallbacks), (1, 1, 0));
        Ok(())
    }

    #[test]
    fn test_stale_thumbnail_is_regenerated() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/c.png", 64, 64)?;
        assert!(store.ensure("/profile/upload/image/c.png").thumb_url().is_some());

        // Age the thumbnail well past the source
        let thumb_path = store.layout().url_to_path("/profile/upload/thumb/c.jpg");
        let stale = FileTime::from_unix_time(1_000_000, 0);
        set_file_mtime(&thumb_path, stale)?;

        let outcome = store.ensure("/profile/upload/image/c.png");
        assert_eq!(outcome, ThumbnailOutcome::Generated("/profile/upload/thumb/c.jpg".into()));
        assert!(mtime(&thumb_path)? > stale);
        assert_eq!(
            store.ensure("/profile/upload/image/c.png"),
            ThumbnailOutcome::Fresh("/profile/upload/thumb/c.jpg".into())
        );
        Ok(())
    }

    #[test]
    fn test_touched_source_invalidates_thumbnail() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        let source = write_png(&store, "/profile/upload/image/d.png", 32, 32)?;
        store.ensure("/profile/upload/image/d.png");

        let thumb_path = store.layout().url_to_path("/profile/upload/thumb/d.jpg");
        set_file_mtime(&thumb_path, FileTime::from_unix_time(2_000_000, 0))?;
        set_file_mtime(&source, FileTime::from_unix_time(3_000_000, 0))?;

        assert!(matches!(
            store.ensure("/profile/upload/image/d.png"),
            ThumbnailOutcome::Generated(_)
        ));
        Ok(())
    }

    #[test]
    fn test_ineligible_paths_pass_through() -> Result<()> {
        let (_temp_dir, store) = setup()?;

        for url in [
            "/profile/upload/file/report.png",
            "/profile/upload/thumb/a.jpg",
            "/profile/upload/image/logo.svg",
            "/elsewhere/a.png",
        ] {
            assert_eq!(store.ensure_thumbnail(url), url);
        }
        assert!(!store.layout().thumb_dir().exists());
        assert_eq!(store.stats().skipped, 4);
        Ok(())
    }

    #[test]
    fn test_missing_source_returns_original() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        let url = "/profile/upload/image/ghost.png";

        assert_eq!(store.ensure(url), ThumbnailOutcome::MissingSource);
        assert_eq!(store.ensure_thumbnail(url), url);

        // A directory named like an image is not a source either
        fs::create_dir_all(store.layout().url_to_path("/profile/upload/image/dir.png"))?;
        assert_eq!(store.ensure("/profile/upload/image/dir.png"), ThumbnailOutcome::MissingSource);
        Ok(())
    }

    #[test]
    fn test_corrupt_source_degrades_without_residue() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        let source = store.layout().url_to_path("/profile/upload/image/bad.png");
        fs::create_dir_all(source.parent().unwrap())?;
        fs::write(&source, b"not really a png")?;

        let served = store.ensure_thumbnail("/profile/upload/image/bad.png");
        assert_eq!(served, "/profile/upload/image/bad.png");

        let thumb_dir = store.layout().thumb_dir();
        assert!(!thumb_dir.join("bad.jpg").exists());
        assert_eq!(fs::read_dir(&thumb_dir)?.count(), 0);
        assert_eq!(store.stats().fallbacks, 1);
        Ok(())
    }

    #[test]
    fn test_failed_persist_leaves_no_temporary_files() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/x.png", 300, 100)?;

        // A non-empty directory squatting on the target makes the final rename fail
        let blocker = store.layout().url_to_path("/profile/upload/thumb/x.jpg");
        fs::create_dir_all(&blocker)?;
        fs::write(blocker.join("keep"), b"keep")?;

        assert_eq!(store.ensure("/profile/upload/image/x.png"), ThumbnailOutcome::Fallback);
        assert_eq!(
            store.ensure_thumbnail("/profile/upload/image/x.png"),
            "/profile/upload/image/x.png"
        );

        let leftovers: Vec<_> = fs::read_dir(store.layout().thumb_dir())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["x.jpg".to_string()]);
        assert!(blocker.is_dir());
        assert_eq!(store.stats().fallbacks, 2);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_thumbnail_is_world_readable() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/shared.png", 300, 100)?;

        let served = store.ensure_thumbnail("/profile/upload/image/shared.png");
        assert_eq!(served, "/profile/upload/thumb/shared.jpg");

        let mode = fs::metadata(store.layout().url_to_path(&served))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        Ok(())
    }

    #[test]
    fn test_oversized_source_is_refused() -> Result<()> {
        let temp_dir = tempdir()?;
        let config = ThumbnailConfig {
            max_source_bytes: 16,
            ..ThumbnailConfig::default()
        };
        let store = ThumbnailStore::new(AssetLayout::new(temp_dir.path())?, config);
        write_png(&store, "/profile/upload/image/big.png", 50, 50)?;

        assert_eq!(store.ensure("/profile/upload/image/big.png"), ThumbnailOutcome::Fallback);
        Ok(())
    }

    #[test]
    fn test_remove_thumbnail() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/e.png", 20, 20)?;
        store.ensure("/profile/upload/image/e.png");

        assert!(store.remove_thumbnail("/profile/upload/image/e.png"));
        assert!(!store.layout().url_to_path("/profile/upload/thumb/e.jpg").exists());
        assert!(!store.remove_thumbnail("/profile/upload/image/e.png"));
        assert!(!store.remove_thumbnail("/profile/upload/file/e.png"));
        Ok(())
    }

    #[test]
    fn test_concurrent_generation_of_same_thumbnail() -> Result<()> {
        let (_temp_dir, store) = setup()?;
        write_png(&store, "/profile/upload/image/f.png", 400, 300)?;
        let store = Arc::new(store);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    assert_eq!(
                        store.ensure_thumbnail("/profile/upload/image/f.png"),
                        "/profile/upload/thumb/f.jpg"
                    );
                });
            }
        });

        let bytes = fs::read(store.layout().url_to_path("/profile/upload/thumb/f.jpg"))?;
        assert_eq!(image::load_from_memory(&bytes)?.dimensions(), (140, 105));
        assert_eq!(fs::read_dir(store.layout().thumb_dir())?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_cache_stats_percentages() {
        let stats = CacheStats {
            hits: 6,
            generated: 3,
            fallbacks: 1,
            skipped: 40,
        };
        assert_eq!(stats.eligible_requests(), 10);
        assert_eq!(stats.fallback_percent(), 10.0);
        assert_eq!(CacheStats::default().fallback_percent(), 0.0);
    }
}
